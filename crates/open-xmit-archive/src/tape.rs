//! AWSTAPE / HET virtual tape framing.
//!
//! Every physical block is prefixed by six bytes: current block size
//! (u16 LE), previous block size (u16 LE), and two flag bytes read as a
//! big-endian halfword:
//!
//! - `0x8000` NEWREC — first block of a logical record
//! - `0x2000` ENDREC — last block of a logical record
//! - `0x4000` EOF — tape mark, no data body
//! - low byte (HET only): `0x0100` ZLIB, `0x0200` BZIP2
//!
//! A logical record is the concatenation of block bodies from a NEWREC
//! block through the next ENDREC block. A tape mark ends the current file;
//! two consecutive tape marks end the tape. Labeled tapes carry VOL1 /
//! HDR1 / HDR2 / UHLn label groups between tape marks; unlabeled files get
//! synthesized `FILE0001`-style names.

use std::io::Read;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, trace};

use crate::config::DecodeConfig;
use crate::cursor::ByteCursor;
use crate::error::{ArchiveError, Result};
use crate::model::{ControlRecordMeta, MetaValue, VolumeLabel};
use crate::recfm::{RecordFormat, RecordKind};
use open_xmit_encoding::CodePage;

const FLAG_NEWREC: u16 = 0x8000;
const FLAG_EOF: u16 = 0x4000;
const FLAG_ENDREC: u16 = 0x2000;
const FLAG_ZLIB: u16 = 0x0100;
const FLAG_BZIP2: u16 = 0x0200;

/// One file recovered from the tape.
#[derive(Debug)]
pub(crate) struct TapeFile {
    pub name: String,
    pub labeled: bool,
    pub recfm: RecordFormat,
    pub lrecl: u32,
    pub blksize: u32,
    pub created: Option<NaiveDateTime>,
    pub hdr1: Option<ControlRecordMeta>,
    pub hdr2: Option<ControlRecordMeta>,
    pub user_labels: Vec<String>,
    /// Logical records in tape order.
    pub records: Vec<Vec<u8>>,
}

impl TapeFile {
    pub fn data(&self) -> Vec<u8> {
        self.records.concat()
    }
}

/// Scan result for a whole tape image.
#[derive(Debug)]
pub(crate) struct TapeScan {
    pub files: Vec<TapeFile>,
    pub volume: Option<VolumeLabel>,
    pub warnings: Vec<String>,
}

/// Labels gathered since the previous data file.
#[derive(Debug, Default)]
struct PendingLabels {
    hdr1: Option<ControlRecordMeta>,
    hdr2: Option<ControlRecordMeta>,
    dsn: Option<String>,
    created: Option<NaiveDateTime>,
    recfm: Option<RecordFormat>,
    lrecl: Option<u32>,
    blksize: Option<u32>,
    user_labels: Vec<String>,
}

/// Walk the tape image and reassemble its files.
pub(crate) fn scan(
    data: &[u8],
    het: bool,
    config: &DecodeConfig,
    codec: &CodePage,
) -> Result<TapeScan> {
    let mut cursor = ByteCursor::new(data);
    let mut scan = TapeScan {
        files: Vec::new(),
        volume: None,
        warnings: Vec::new(),
    };
    let mut pending = PendingLabels::default();
    let mut record: Vec<u8> = Vec::new();
    let mut file_records: Vec<Vec<u8>> = Vec::new();
    let mut marks_in_a_row = 0;
    let mut file_number = 1;

    while !cursor.is_eof() {
        let offset = cursor.position();
        if cursor.remaining() < 6 {
            // Some images carry trailing padding shorter than a header.
            if cursor.peek_slice(cursor.remaining())?.iter().all(|&b| b == 0) {
                break;
            }
            return Err(ArchiveError::Truncated {
                offset,
                need: 6,
                have: cursor.remaining(),
            });
        }
        let block_size = usize::from(cursor.read_u16_le()?);
        let _prev_size = cursor.read_u16_le()?;
        let flags = cursor.read_u16_be()?;
        trace!(offset, block_size, flags = %format!("{flags:#06x}"), "tape block");

        if flags == 0 {
            // Zero-filled tail after the last tape mark.
            break;
        }

        if flags & FLAG_EOF != 0 {
            marks_in_a_row += 1;
            if !record.is_empty() {
                scan.warnings.push(format!(
                    "tape mark at offset {offset} inside an unterminated record"
                ));
                file_records.push(std::mem::take(&mut record));
            }
            finish_file(
                &mut scan,
                &mut pending,
                std::mem::take(&mut file_records),
                &mut file_number,
                config,
                codec,
            );
            if marks_in_a_row == 2 {
                debug!(offset, "double tape mark, end of tape");
                break;
            }
            continue;
        }

        if flags & (FLAG_NEWREC | FLAG_ENDREC) == 0 {
            return Err(ArchiveError::MalformedRecord {
                offset,
                detail: format!("unrecognized tape block flags {flags:#06x}"),
            });
        }
        marks_in_a_row = 0;

        let body = cursor.read_slice(block_size)?;
        let inflated = match flags & (FLAG_ZLIB | FLAG_BZIP2) {
            0 => body.to_vec(),
            compression if !het => {
                return Err(ArchiveError::UnsupportedFeature(format!(
                    "compression flag {compression:#06x} on an AWS tape (HET only)"
                )))
            }
            FLAG_ZLIB => inflate_zlib(body, offset, config.max_record_bytes)?,
            FLAG_BZIP2 => inflate_bzip2(body, offset, config.max_record_bytes)?,
            both => {
                return Err(ArchiveError::MalformedRecord {
                    offset,
                    detail: format!("mutually exclusive compression flags {both:#06x} both set"),
                })
            }
        };

        if flags & FLAG_NEWREC != 0 && !record.is_empty() {
            scan.warnings.push(format!(
                "NEWREC at offset {offset} inside an unterminated record"
            ));
            file_records.push(std::mem::take(&mut record));
        }
        record.extend_from_slice(&inflated);
        if record.len() > config.max_record_bytes {
            return Err(ArchiveError::PolicyViolation {
                size: record.len(),
                limit: config.max_record_bytes,
            });
        }
        if flags & FLAG_ENDREC != 0 {
            file_records.push(std::mem::take(&mut record));
        }
    }

    if !record.is_empty() {
        file_records.push(record);
    }
    if !file_records.is_empty() {
        scan.warnings
            .push("tape image ended without a final tape mark".to_string());
        finish_file(
            &mut scan,
            &mut pending,
            file_records,
            &mut file_number,
            config,
            codec,
        );
    }
    Ok(scan)
}

/// Close out the records accumulated since the last tape mark: either a
/// standard-label group or a data file.
fn finish_file(
    scan: &mut TapeScan,
    pending: &mut PendingLabels,
    records: Vec<Vec<u8>>,
    file_number: &mut usize,
    config: &DecodeConfig,
    codec: &CodePage,
) {
    if records.is_empty() {
        return;
    }

    if is_label_group(&records, codec) {
        for record in &records {
            apply_label(scan, pending, record, codec);
        }
        return;
    }

    let labeled = pending.hdr1.is_some();
    let name = pending
        .dsn
        .take()
        .unwrap_or_else(|| format!("FILE{file_number:04}"));
    let recfm = pending.recfm.take().unwrap_or(RecordFormat {
        kind: RecordKind::Undefined,
        ..RecordFormat::default()
    });
    let lrecl = pending.lrecl.take().filter(|&l| l > 0).unwrap_or_else(|| {
        if recfm.kind == RecordKind::Undefined {
            records.first().map(|r| r.len() as u32).unwrap_or(0)
        } else {
            config.fallback_lrecl
        }
    });
    let blksize = pending
        .blksize
        .take()
        .filter(|&b| b > 0)
        .unwrap_or_else(|| records.first().map(|r| r.len() as u32).unwrap_or(0));

    debug!(name = %name, labeled, lrecl, blksize, records = records.len(), "tape file");
    scan.files.push(TapeFile {
        name,
        labeled,
        recfm,
        lrecl,
        blksize,
        created: pending.created.take(),
        hdr1: pending.hdr1.take(),
        hdr2: pending.hdr2.take(),
        user_labels: std::mem::take(&mut pending.user_labels),
        records,
    });
    *file_number += 1;
}

/// A file whose every record is an 80-byte standard label is a label group.
fn is_label_group(records: &[Vec<u8>], codec: &CodePage) -> bool {
    let first = match records.first() {
        Some(first) if first.len() == 80 => first,
        _ => return false,
    };
    let kind = codec.decode(&first[..4]);
    matches!(
        kind.as_str(),
        "VOL1" | "HDR1" | "HDR2" | "EOF1" | "EOF2" | "UHL1"
    )
}

fn apply_label(
    scan: &mut TapeScan,
    pending: &mut PendingLabels,
    record: &[u8],
    codec: &CodePage,
) {
    if record.len() != 80 {
        scan.warnings
            .push(format!("label record of {} bytes ignored", record.len()));
        return;
    }
    let text = codec.decode(record);
    match &text[..3] {
        "VOL" => {
            scan.volume = Some(VolumeLabel {
                volser: text[4..10].trim().to_string(),
                owner: text[41..51].trim().to_string(),
            });
        }
        "HDR" if text.as_bytes()[3] == b'1' => {
            let mut meta = ControlRecordMeta::new("HDR1");
            let dsn = text[4..21].trim().to_string();
            meta.set("dsn", MetaValue::Str(dsn.clone()));
            meta.set("dsnser", MetaValue::Str(text[21..27].to_string()));
            meta.set("volseq", MetaValue::Int(zoned(&text[27..31])));
            meta.set("dsnseq", MetaValue::Int(zoned(&text[31..35])));
            meta.set("gennum", MetaValue::Int(zoned(&text[35..39])));
            meta.set("version", MetaValue::Int(zoned(&text[39..41])));
            let created = label_date(&text[41..47]);
            if let Some(created) = created {
                meta.set("createdate", MetaValue::Timestamp(created));
            }
            if let Some(expires) = label_date(&text[47..53]) {
                meta.set("expirationdate", MetaValue::Timestamp(expires));
            }
            meta.set("dsnsec", MetaValue::Bool(zoned(&text[53..54]) != 0));
            meta.set("block_count_low", MetaValue::Int(zoned(&text[54..60])));
            meta.set("system_code", MetaValue::Str(text[60..73].to_string()));
            meta.set("block_count_high", MetaValue::Int(zoned(&text[76..80])));
            pending.dsn = Some(dsn);
            pending.created = created;
            pending.hdr1 = Some(meta);
        }
        "HDR" if text.as_bytes()[3] == b'2' => {
            let mut meta = ControlRecordMeta::new("HDR2");
            let recfm_char = text.as_bytes()[4] as char;
            let blksize = zoned(&text[5..10]) as u32;
            let lrecl = zoned(&text[10..15]) as u32;
            meta.set("recfm", MetaValue::Str(recfm_char.to_string()));
            meta.set("block_len", MetaValue::Int(u64::from(blksize)));
            meta.set("lrecl", MetaValue::Int(u64::from(lrecl)));
            meta.set("density", MetaValue::Int(zoned(&text[15..16])));
            meta.set("position", MetaValue::Str(text[16..17].to_string()));
            meta.set("jobid", MetaValue::Str(text[17..34].to_string()));
            meta.set("technique", MetaValue::Str(text[34..36].to_string()));
            meta.set("control_char", MetaValue::Str(text[36..37].to_string()));
            meta.set("block_attr", MetaValue::Str(text[38..39].to_string()));
            meta.set("devser", MetaValue::Str(text[41..47].to_string()));
            meta.set("dsnid", MetaValue::Str(text[47..48].to_string()));
            meta.set("large_block_len", MetaValue::Str(text[70..80].to_string()));

            let kind = match recfm_char {
                'F' => RecordKind::Fixed,
                'V' => RecordKind::Variable,
                _ => RecordKind::Undefined,
            };
            pending.recfm = Some(RecordFormat {
                kind,
                // HDR2 carries blocking only implicitly; a block larger than
                // one record means blocked.
                blocked: lrecl > 0 && blksize > lrecl,
                ..RecordFormat::default()
            });
            pending.lrecl = Some(lrecl);
            pending.blksize = Some(blksize);
            pending.hdr2 = Some(meta);
        }
        "UHL" => pending.user_labels.push(text),
        "EOF" | "UTL" => {}
        other => scan
            .warnings
            .push(format!("unrecognized label '{other}' ignored")),
    }
}

/// Zoned-decimal label field: digits with optional surrounding blanks.
fn zoned(field: &str) -> u64 {
    field.trim().parse().unwrap_or(0)
}

/// Label date `cyyddd`: blank century is 1900, digit `c` is 2000 + 100c.
fn label_date(field: &str) -> Option<NaiveDateTime> {
    let bytes = field.as_bytes();
    if bytes.len() != 6 {
        return None;
    }
    let century = match bytes[0] {
        b' ' => 1900,
        c if c.is_ascii_digit() => 2000 + 100 * i32::from(c - b'0'),
        _ => return None,
    };
    let year: i32 = field[1..3].parse().ok()?;
    let day: u32 = field[3..6].trim().parse().ok()?;
    let date = NaiveDate::from_yo_opt(century + year, day.max(1))?;
    date.and_hms_opt(0, 0, 0)
}

fn inflate_zlib(body: &[u8], offset: usize, cap: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut decoder = flate2::read::ZlibDecoder::new(body).take(cap as u64 + 1);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ArchiveError::MalformedRecord {
            offset,
            detail: format!("ZLIB block failed to inflate: {e}"),
        })?;
    if out.len() > cap {
        return Err(ArchiveError::PolicyViolation {
            size: out.len(),
            limit: cap,
        });
    }
    Ok(out)
}

fn inflate_bzip2(body: &[u8], offset: usize, cap: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut decoder = bzip2::read::BzDecoder::new(body).take(cap as u64 + 1);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ArchiveError::MalformedRecord {
            offset,
            detail: format!("BZIP2 block failed to inflate: {e}"),
        })?;
    if out.len() > cap {
        return Err(ArchiveError::PolicyViolation {
            size: out.len(),
            limit: cap,
        });
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use open_xmit_encoding::CP037;
    use std::io::Write;

    /// One tape block with the given flags.
    pub(crate) fn block(flags: u16, body: &[u8], prev: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(body.len() + 6);
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(&(prev as u16).to_le_bytes());
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    pub(crate) fn tape_mark() -> Vec<u8> {
        block(FLAG_EOF, &[], 0)
    }

    /// An 80-byte EBCDIC label record.
    pub(crate) fn label(text: &str) -> Vec<u8> {
        let mut padded = text.to_string();
        while padded.len() < 80 {
            padded.push(' ');
        }
        CP037.encode(&padded).unwrap()
    }

    pub(crate) fn hdr1(dsn: &str, date: &str) -> Vec<u8> {
        // dsn 4..21, serial 21..27, volume/dataset/generation sequences and
        // version 27..41, creation date 41..47, expiration 47..53, security
        // 53, block count 54..60, system code 60..73.
        let text = format!(
            "HDR1{dsn:<17}XMILIB00010001000100{date}{date}0000000{system:<13}",
            system = "IBM OS/VS 370"
        );
        label(&text)
    }

    pub(crate) fn hdr2(recfm: char, blksize: u32, lrecl: u32) -> Vec<u8> {
        // recfm 4, blksize 5..10, lrecl 10..15, density 15, position 16,
        // jobid 17..34.
        let text = format!("HDR2{recfm}{blksize:05}{lrecl:05}0 {jobid:<17}", jobid = "PYTHONXMI/STEP1");
        label(&text)
    }

    pub(crate) fn vol1(volser: &str, owner: &str) -> Vec<u8> {
        let mut text = format!("VOL1{volser:<6}");
        while text.len() < 41 {
            text.push(' ');
        }
        text.push_str(owner);
        label(&text)
    }

    fn fixed_file(byte: u8, blocks: usize) -> Vec<Vec<u8>> {
        (0..blocks).map(|_| vec![byte; 80]).collect()
    }

    #[test]
    fn test_unlabeled_tape() {
        let mut image = Vec::new();
        image.extend_from_slice(&block(0xA000, &[0xC1; 100], 0));
        image.extend_from_slice(&tape_mark());
        image.extend_from_slice(&block(0xA000, &[0xC2; 60], 0));
        image.extend_from_slice(&tape_mark());
        image.extend_from_slice(&tape_mark());

        let scan = scan(&image, false, &DecodeConfig::default(), &CP037).unwrap();
        assert_eq!(scan.files.len(), 2);
        assert_eq!(scan.files[0].name, "FILE0001");
        assert_eq!(scan.files[1].name, "FILE0002");
        assert!(!scan.files[0].labeled);
        assert_eq!(scan.files[0].recfm.to_string(), "U");
        assert_eq!(scan.files[0].lrecl, 100);
        assert_eq!(scan.files[0].data(), vec![0xC1; 100]);
        assert!(scan.volume.is_none());
    }

    #[test]
    fn test_record_spans_blocks() {
        let mut image = Vec::new();
        image.extend_from_slice(&block(FLAG_NEWREC, &[0xC1; 40], 0));
        image.extend_from_slice(&block(0x0000, &[0xC2; 40], 40));
        image.extend_from_slice(&block(FLAG_ENDREC, &[0xC3; 40], 40));
        image.extend_from_slice(&tape_mark());
        image.extend_from_slice(&tape_mark());

        let scan = scan(&image, false, &DecodeConfig::default(), &CP037).unwrap();
        assert_eq!(scan.files.len(), 1);
        assert_eq!(scan.files[0].records.len(), 1);
        assert_eq!(scan.files[0].records[0].len(), 120);
    }

    #[test]
    fn test_labeled_tape() {
        let mut image = Vec::new();
        // Label group: VOL1 + HDR1 + HDR2, then a tape mark.
        image.extend_from_slice(&block(0xA000, &vol1("XMILIB", "OPENXMIT"), 0));
        image.extend_from_slice(&block(0xA000, &hdr1("PYTHON.XMI.SEQ", "021067"), 80));
        image.extend_from_slice(&block(0xA000, &hdr2('F', 3200, 80), 80));
        image.extend_from_slice(&tape_mark());
        // Data file: two 80-byte records.
        for record in fixed_file(0xC1, 2) {
            image.extend_from_slice(&block(0xA000, &record, 80));
        }
        image.extend_from_slice(&tape_mark());
        // Trailer labels, then double mark.
        image.extend_from_slice(&block(0xA000, &label("EOF1"), 0));
        image.extend_from_slice(&tape_mark());
        image.extend_from_slice(&tape_mark());

        let scan = scan(&image, false, &DecodeConfig::default(), &CP037).unwrap();
        let volume = scan.volume.as_ref().unwrap();
        assert_eq!(volume.volser, "XMILIB");
        assert_eq!(volume.owner, "OPENXMIT");

        assert_eq!(scan.files.len(), 1);
        let file = &scan.files[0];
        assert_eq!(file.name, "PYTHON.XMI.SEQ");
        assert!(file.labeled);
        assert_eq!(file.recfm.to_string(), "FB");
        assert_eq!(file.lrecl, 80);
        assert_eq!(file.blksize, 3200);
        assert_eq!(
            file.created.unwrap().date().to_string(),
            "2021-03-08"
        );
        assert_eq!(file.records.len(), 2);
        let hdr1_meta = file.hdr1.as_ref().unwrap();
        assert_eq!(hdr1_meta.get_str("dsn"), Some("PYTHON.XMI.SEQ"));
        assert_eq!(hdr1_meta.get_int("volseq"), Some(1));
    }

    #[test]
    fn test_compression_rejected_on_aws() {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&[0xC1; 80]).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut image = Vec::new();
        image.extend_from_slice(&block(0xA000 | FLAG_ZLIB, &compressed, 0));
        image.extend_from_slice(&tape_mark());
        image.extend_from_slice(&tape_mark());

        let err = scan(&image, false, &DecodeConfig::default(), &CP037).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFeature(_)));

        // The same image opens fine as HET.
        let scan = scan(&image, true, &DecodeConfig::default(), &CP037).unwrap();
        assert_eq!(scan.files[0].data(), vec![0xC1; 80]);
    }

    #[test]
    fn test_bzip2_blocks_inflate() {
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(&[0xD5; 160]).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut image = Vec::new();
        image.extend_from_slice(&block(0xA000 | FLAG_BZIP2, &compressed, 0));
        image.extend_from_slice(&tape_mark());
        image.extend_from_slice(&tape_mark());

        let scan = scan(&image, true, &DecodeConfig::default(), &CP037).unwrap();
        assert_eq!(scan.files[0].data(), vec![0xD5; 160]);
    }

    #[test]
    fn test_unknown_flags_fail() {
        let image = block(0x0800, &[0x00; 4], 0);
        let err = scan(&image, false, &DecodeConfig::default(), &CP037).unwrap_err();
        assert!(matches!(err, ArchiveError::MalformedRecord { .. }));
    }

    #[test]
    fn test_label_date_centuries() {
        assert_eq!(
            label_date(" 98032").unwrap().date().to_string(),
            "1998-02-01"
        );
        assert_eq!(
            label_date("021067").unwrap().date().to_string(),
            "2021-03-08"
        );
        assert!(label_date("junk").is_none());
    }
}
