//! IEBCOPY unload decoding: COPYR1/COPYR2 control records, directory
//! blocks, and TTR-keyed member data groups.
//!
//! The unload stream arrives as logical records (the outer container's
//! framing already removed). The first two records are the COPYR1 and
//! COPYR2 control records; directory blocks follow until the 0xFF-name end
//! marker; member data groups run to the end of the stream. Members are
//! deblocked with the COPYR1 RECFM/LRECL through the record-format engine.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, trace};

use crate::config::DecodeConfig;
use crate::cursor::be_uint;
use crate::error::{ArchiveError, Result};
use crate::model::{ControlRecordMeta, DatasetOrg, IspfStats, Member, MetaValue};
use crate::recfm::{self, RecordFormat, RecordKind};
use open_xmit_encoding::CodePage;

/// COPYR1 eye-catcher.
const EYECATCHER: u32 = 0xCA6D0F;
/// Directory end marker: a member name of eight 0xFF bytes.
const END_OF_DIRECTORY: [u8; 8] = [0xFF; 8];
/// A directory block never exceeds this size.
const MAX_DIRECTORY_BLOCK: usize = 276;

/// Decoded unload stream.
#[derive(Debug, Default)]
pub(crate) struct PdsOutput {
    pub org: DatasetOrg,
    pub recfm: RecordFormat,
    pub lrecl: u32,
    pub blksize: u32,
    pub copyr1: Option<ControlRecordMeta>,
    pub copyr2: Option<ControlRecordMeta>,
    pub members: Vec<Member>,
    pub warnings: Vec<String>,
}

/// A failed decode still exposes whatever was parsed before the error.
#[derive(Debug)]
pub(crate) struct PdsFailure {
    pub error: ArchiveError,
    pub partial: PdsOutput,
}

type PdsResult = std::result::Result<PdsOutput, Box<PdsFailure>>;

/// Whether a logical record opens an IEBCOPY unload: the 0xCA6D0F
/// eye-catcher at offset 1, or at offset 9 behind a BDW/RDW prefix.
pub(crate) fn looks_like_iebcopy(record: &[u8]) -> bool {
    let at = |offset: usize| {
        record
            .get(offset..offset + 3)
            .map(|b| be_uint(b) as u32 == EYECATCHER)
            .unwrap_or(false)
    };
    at(1) || at(9)
}

/// Decode an IEBCOPY unload from its logical records.
pub(crate) fn decode(records: &[Vec<u8>], codec: &CodePage, config: &DecodeConfig) -> PdsResult {
    let mut output = PdsOutput::default();

    let first = records.first().ok_or_else(|| {
        Box::new(PdsFailure {
            error: ArchiveError::Truncated {
                offset: 0,
                need: 64,
                have: 0,
            },
            partial: PdsOutput::default(),
        })
    })?;
    if let Err(error) = parse_copyr1(first, &mut output) {
        return Err(Box::new(PdsFailure {
            error,
            partial: output,
        }));
    }

    let second = match records.get(1) {
        Some(second) => second,
        None => {
            return Err(Box::new(PdsFailure {
                error: ArchiveError::Truncated {
                    offset: first.len(),
                    need: 16,
                    have: 0,
                },
                partial: output,
            }))
        }
    };
    if let Err(error) = parse_copyr2(second, &mut output) {
        return Err(Box::new(PdsFailure {
            error,
            partial: output,
        }));
    }

    match decode_members(&records[2..], codec, config, &mut output) {
        Ok(()) => Ok(output),
        Err(error) => Err(Box::new(PdsFailure {
            error,
            partial: output,
        })),
    }
}

/// COPYR1: dataset attributes and device geometry of the unloaded PDS.
fn parse_copyr1(record: &[u8], output: &mut PdsOutput) -> Result<()> {
    // XMI records start at the flag byte; tape records keep an 8-byte
    // BDW/RDW prefix in front of it.
    let r = if record.len() >= 4 && be_uint(&record[1..4]) as u32 == EYECATCHER {
        record
    } else if record.len() >= 12 && be_uint(&record[9..12]) as u32 == EYECATCHER {
        &record[8..]
    } else {
        return Err(ArchiveError::MalformedRecord {
            offset: 0,
            detail: "COPYR1 eye-catcher 0xCA6D0F not found".to_string(),
        });
    };
    if r.len() > 64 {
        return Err(ArchiveError::MalformedRecord {
            offset: 0,
            detail: format!("COPYR1 record of {} bytes exceeds 64", r.len()),
        });
    }
    if r.len() < 38 {
        return Err(ArchiveError::Truncated {
            offset: r.len(),
            need: 38 - r.len(),
            have: 0,
        });
    }

    let pdse = r[0] & 0x01 != 0;
    let dsorg = u16::from_be_bytes([r[4], r[5]]);
    let recfm = RecordFormat::from_ds1_byte(r[10]);
    output.org = if pdse || dsorg == 0x0208 {
        DatasetOrg::PartitionedExtended
    } else {
        DatasetOrg::Partitioned
    };
    output.recfm = recfm;
    output.blksize = u32::from(u16::from_be_bytes([r[6], r[7]]));
    output.lrecl = u32::from(u16::from_be_bytes([r[8], r[9]]));

    let mut meta = ControlRecordMeta::new("COPYR1");
    meta.set(
        "type",
        MetaValue::Str(if pdse { "PDSE" } else { "PDS" }.to_string()),
    );
    meta.set("DS1DSORG", MetaValue::Int(u64::from(dsorg)));
    meta.set("DS1BLKL", MetaValue::Int(u64::from(output.blksize)));
    meta.set("DS1LRECL", MetaValue::Int(u64::from(output.lrecl)));
    meta.set("DS1RECFM", MetaValue::Str(recfm.to_string()));
    meta.set("DS1KEYL", MetaValue::Int(u64::from(r[11])));
    meta.set("DS1OPTCD", MetaValue::Int(u64::from(r[12])));
    meta.set("DS1SMSFG", MetaValue::Int(u64::from(r[13])));
    meta.set(
        "file_tape_blocksize",
        MetaValue::Int(be_uint(&r[14..16])),
    );
    meta.set("DVAOPTS", MetaValue::Int(be_uint(&r[16..18])));
    meta.set("DVACLASS", MetaValue::Int(u64::from(r[18])));
    meta.set("DVAUNIT", MetaValue::Int(u64::from(r[19])));
    meta.set("DVAMAXRC", MetaValue::Int(be_uint(&r[20..24])));
    meta.set("DVACYL", MetaValue::Int(be_uint(&r[24..26])));
    meta.set("DVATRK", MetaValue::Int(be_uint(&r[26..28])));
    meta.set("DVATRKLN", MetaValue::Int(be_uint(&r[28..30])));
    meta.set("DVAOVHD", MetaValue::Int(be_uint(&r[30..32])));
    meta.set("num_header_records", MetaValue::Int(be_uint(&r[36..38])));

    // The trailing DS1* section is present when any of it is nonzero.
    if r.len() >= 54 && r[38..].iter().any(|&b| b != 0) {
        if let Some(refd) = julian_ds1refd(&r[39..42]) {
            meta.set("DS1REFD", MetaValue::Str(refd.to_string()));
        }
        meta.set("DS1SCEXT", MetaValue::Bytes(r[42..45].to_vec()));
        meta.set("DS1SCALO", MetaValue::Bytes(r[45..49].to_vec()));
        meta.set("DS1LSTAR", MetaValue::Bytes(r[49..52].to_vec()));
        meta.set("DS1TRBAL", MetaValue::Bytes(r[52..54].to_vec()));
    }

    debug!(
        recfm = %recfm,
        lrecl = output.lrecl,
        blksize = output.blksize,
        org = output.org.as_str(),
        "COPYR1"
    );
    output.copyr1 = Some(meta);
    Ok(())
}

/// DS1REFD: one binary year byte since 1900, then a binary day-of-year
/// halfword.
fn julian_ds1refd(bytes: &[u8]) -> Option<NaiveDate> {
    let year = 1900 + i32::from(bytes[0]);
    let day = u32::from(u16::from_be_bytes([bytes[1], bytes[2]]));
    NaiveDate::from_yo_opt(year, day.max(1))
}

/// COPYR2: the DEB basic-section tail plus sixteen extent descriptors.
fn parse_copyr2(record: &[u8], output: &mut PdsOutput) -> Result<()> {
    if record.len() > MAX_DIRECTORY_BLOCK {
        return Err(ArchiveError::MalformedRecord {
            offset: 0,
            detail: format!("COPYR2 record of {} bytes exceeds 276", record.len()),
        });
    }
    if record.len() < 16 {
        return Err(ArchiveError::Truncated {
            offset: 0,
            need: 16,
            have: record.len(),
        });
    }
    let mut meta = ControlRecordMeta::new("COPYR2");
    meta.set("deb", MetaValue::Bytes(record[..16].to_vec()));
    let mut extents = Vec::new();
    for chunk in record[16..].chunks(16).take(16) {
        extents.push(chunk.to_vec());
    }
    meta.set(
        "extents",
        MetaValue::Bytes(extents.concat()),
    );
    output.copyr2 = Some(meta);
    Ok(())
}

/// Directory walk plus member-data extraction.
fn decode_members(
    records: &[Vec<u8>],
    codec: &CodePage,
    config: &DecodeConfig,
    output: &mut PdsOutput,
) -> Result<()> {
    if output.org == DatasetOrg::PartitionedExtended {
        output
            .warnings
            .push("PDSE unload: member extraction is best-effort".to_string());
    }

    // Phase 2: directory blocks until the 0xFF end marker.
    let mut consumed = 0;
    let mut directory_done = false;
    for record in records {
        consumed += 1;
        if parse_directory_block(record, codec, output)? {
            directory_done = true;
            break;
        }
    }
    if !directory_done {
        return Err(ArchiveError::MalformedRecord {
            offset: 0,
            detail: "directory end marker not found".to_string(),
        });
    }
    debug!(members = output.members.len(), "directory decoded");

    // Phase 3: member data groups, keyed by TTR.
    let data: Vec<u8> = records[consumed..].concat();
    let mut groups: BTreeMap<u32, Vec<Vec<u8>>> = BTreeMap::new();
    let mut order: Vec<u32> = Vec::new();
    let mut pos = 0usize;
    while pos + 9 <= data.len() {
        let ttr = be_uint(&data[pos + 4..pos + 7]) as u32;
        let len = usize::from(u16::from_be_bytes([data[pos + 7], data[pos + 8]]));
        trace!(pos, ttr, len, "member data group");
        if pos + 9 + len > data.len() {
            return Err(ArchiveError::Truncated {
                offset: pos + 9,
                need: len,
                have: data.len() - pos - 9,
            });
        }
        if ttr != 0 && len > 0 {
            if !groups.contains_key(&ttr) {
                order.push(ttr);
            }
            let member_bytes: usize =
                groups.values().flat_map(|g| g.iter().map(Vec::len)).sum();
            if member_bytes + len > config.max_record_bytes {
                return Err(ArchiveError::PolicyViolation {
                    size: member_bytes + len,
                    limit: config.max_record_bytes,
                });
            }
            groups
                .entry(ttr)
                .or_default()
                .push(data[pos + 9..pos + 9 + len].to_vec());
        }
        pos += 9 + len;
    }
    if pos < data.len() && data[pos..].iter().any(|&b| b != 0) {
        output
            .warnings
            .push("trailing bytes after the last member data group".to_string());
    }

    // Attach data to directory entries.
    let recfm = output.recfm;
    let lrecl = output.lrecl;
    let mut no_data: Vec<String> = Vec::new();
    for member in output.members.iter_mut().filter(|m| !m.alias) {
        match groups.remove(&member.ttr) {
            Some(blocks) => attach_member_data(member, blocks, recfm, lrecl)?,
            None => no_data.push(member.name.clone()),
        }
    }
    for name in no_data {
        output
            .warnings
            .push(format!("member {name} has no data groups"));
    }

    // An alias whose TTR still has unclaimed data is really a primary
    // member under another name.
    let mut promoted: Vec<String> = Vec::new();
    for member in output.members.iter_mut().filter(|m| m.alias) {
        if let Some(blocks) = groups.remove(&member.ttr) {
            member.alias = false;
            attach_member_data(member, blocks, recfm, lrecl)?;
            promoted.push(member.name.clone());
        }
    }
    for name in promoted {
        output.warnings.push(format!(
            "alias {name} owned its data and was promoted to a member"
        ));
    }

    // Whatever data remains matched no directory entry.
    for ttr in order {
        if let Some(blocks) = groups.remove(&ttr) {
            let mut member = Member {
                name: format!("__ORPHAN_{ttr:06x}__"),
                ttr,
                ..Member::default()
            };
            attach_member_data(&mut member, blocks, recfm, lrecl)?;
            output.warnings.push(format!(
                "member data at TTR {ttr:#08x} matches no directory entry; kept as {}",
                member.name
            ));
            output.members.push(member);
        }
    }
    Ok(())
}

/// Parse one directory block; returns true when the end marker was seen.
fn parse_directory_block(
    record: &[u8],
    codec: &CodePage,
    output: &mut PdsOutput,
) -> Result<bool> {
    if record.len() > MAX_DIRECTORY_BLOCK {
        return Err(ArchiveError::MalformedRecord {
            offset: 0,
            detail: format!("directory block of {} bytes exceeds 276", record.len()),
        });
    }
    if record.len() < 22 {
        return Err(ArchiveError::Truncated {
            offset: 0,
            need: 22,
            have: record.len(),
        });
    }
    // 8-byte marker, key length, used length, last member name, then the
    // entry area with its own leading length halfword.
    let used = usize::from(u16::from_be_bytes([record[20], record[21]]));
    if used < 2 || 20 + used > record.len() {
        return Err(ArchiveError::MalformedRecord {
            offset: 20,
            detail: format!("directory entry area length {used} inconsistent with block"),
        });
    }
    let entries = &record[22..20 + used];

    let mut pos = 0usize;
    while pos + 8 <= entries.len() {
        let name_bytes = &entries[pos..pos + 8];
        if name_bytes == END_OF_DIRECTORY {
            return Ok(true);
        }
        if pos + 13 > entries.len() {
            return Err(ArchiveError::Truncated {
                offset: 22 + pos,
                need: 13,
                have: entries.len() - pos,
            });
        }
        let name = codec.decode(name_bytes).trim_end().to_string();
        let ttr = be_uint(&entries[pos + 8..pos + 11]) as u32;
        let c = entries[pos + 11];
        let notes = entries[pos + 12];
        let halfword_count = usize::from(c & 0x1F);
        let parms_len = halfword_count * 2;
        if pos + 13 + parms_len > entries.len() {
            return Err(ArchiveError::Truncated {
                offset: 22 + pos + 13,
                need: parms_len,
                have: entries.len() - pos - 13,
            });
        }
        let parms = entries[pos + 13..pos + 13 + parms_len].to_vec();

        let ispf = if parms.len() >= 30 {
            parse_ispf_stats(&parms, codec)
        } else {
            None
        };
        trace!(name = %name, ttr, alias = c & 0x80 != 0, "directory entry");
        output.members.push(Member {
            name,
            ttr,
            alias: c & 0x80 != 0,
            halfwords: (parms_len) as u16,
            notes,
            parms,
            ispf,
            ..Member::default()
        });
        pos += 13 + parms_len;
    }
    Ok(false)
}

/// Two-nibble BCD byte to its decimal value.
fn bcd(byte: u8) -> u32 {
    u32::from(byte >> 4) * 10 + u32::from(byte & 0x0F)
}

/// 3-byte packed date: century digit, two year digits, three day-of-year
/// digits. Century 0 is 1900, 1 is 2000.
fn packed_date(bytes: &[u8]) -> Option<NaiveDate> {
    let century = u32::from(bytes[0] >> 4);
    let year = u32::from(bytes[0] & 0x0F) * 10 + u32::from(bytes[1] >> 4);
    let day = u32::from(bytes[1] & 0x0F) * 100 + bcd(bytes[2]);
    NaiveDate::from_yo_opt(1900 + (century * 100 + year) as i32, day.max(1))
}

/// ISPF statistics from a member's 30-byte parms.
fn parse_ispf_stats(parms: &[u8], codec: &CodePage) -> Option<IspfStats> {
    if parms.len() < 28 {
        return None;
    }
    let created = packed_date(&parms[3..6]);
    let modified = packed_date(&parms[6..9]).and_then(|date| {
        let time = date.and_hms_opt(bcd(parms[9]), bcd(parms[10]), bcd(parms[18]))?;
        let micros = i64::from(bcd(parms[19])) * 10_000;
        time.checked_add_signed(chrono::Duration::microseconds(micros))
    });
    Some(IspfStats {
        version: format!("{:02X}.{:02X}", parms[0], parms[1]),
        flags: parms[2],
        created,
        modified,
        lines: u32::from(u16::from_be_bytes([parms[11], parms[12]])),
        newlines: u32::from(u16::from_be_bytes([parms[13], parms[14]])),
        modlines: u32::from(u16::from_be_bytes([parms[15], parms[16]])),
        owner: codec.decode(&parms[20..28]).trim_end().to_string(),
    })
}

/// Deblock a member's data groups with the dataset RECFM/LRECL.
fn attach_member_data(
    member: &mut Member,
    blocks: Vec<Vec<u8>>,
    recfm: RecordFormat,
    lrecl: u32,
) -> Result<()> {
    let records = recfm::deblock(recfm, lrecl, &blocks)?;
    member.data = match recfm.kind {
        // Variable records drop their descriptor words in the final stream.
        RecordKind::Variable => records.concat(),
        _ => blocks.concat(),
    };
    member.records = records;
    Ok(())
}

/// Format a modified timestamp the way dumps expect it.
pub(crate) fn iso_micros(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use open_xmit_encoding::CP037;

    pub(crate) fn copyr1_record(recfm_byte: u8, lrecl: u16, blksize: u16) -> Vec<u8> {
        let mut r = vec![0u8; 56];
        r[0] = 0x00;
        r[1..4].copy_from_slice(&[0xCA, 0x6D, 0x0F]);
        r[4..6].copy_from_slice(&0x0200u16.to_be_bytes());
        r[6..8].copy_from_slice(&blksize.to_be_bytes());
        r[8..10].copy_from_slice(&lrecl.to_be_bytes());
        r[10] = recfm_byte;
        r[36..38].copy_from_slice(&2u16.to_be_bytes());
        r
    }

    pub(crate) fn copyr2_record() -> Vec<u8> {
        let mut r = vec![0u8; 276];
        r[0] = 0x10;
        for (i, chunk) in r[16..272].chunks_mut(16).enumerate() {
            chunk[0] = i as u8 + 1;
        }
        r
    }

    /// One directory block holding the given entries plus the end marker.
    pub(crate) fn directory_block(entries: &[(&str, u32, bool, &[u8])]) -> Vec<u8> {
        let mut area = Vec::new();
        for (name, ttr, alias, parms) in entries {
            let mut padded = CP037.encode(name).unwrap();
            padded.resize(8, 0x40);
            area.extend_from_slice(&padded);
            area.extend_from_slice(&ttr.to_be_bytes()[1..4]);
            let halfwords = (parms.len() / 2) as u8;
            area.push(if *alias { 0x80 | halfwords } else { halfwords });
            area.push(0); // notes
            area.extend_from_slice(parms);
        }
        area.extend_from_slice(&END_OF_DIRECTORY);

        let mut block = vec![0u8; 22];
        block[8..10].copy_from_slice(&8u16.to_be_bytes());
        block[10..12].copy_from_slice(&256u16.to_be_bytes());
        block[12..20].copy_from_slice(&[0x40; 8]);
        block[20..22].copy_from_slice(&((area.len() + 2) as u16).to_be_bytes());
        block.extend_from_slice(&area);
        block
    }

    /// A member data group: 9-byte header plus payload.
    pub(crate) fn data_group(ttr: u32, payload: &[u8]) -> Vec<u8> {
        let mut group = vec![0u8; 9];
        group[4..7].copy_from_slice(&ttr.to_be_bytes()[1..4]);
        group[7..9].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        group.extend_from_slice(payload);
        group
    }

    /// 30-byte ISPF parms for version 01.00, created/modified 2021-03-08,
    /// modified 22:53:29, owner PHIL, 10 lines.
    pub(crate) fn ispf_parms() -> Vec<u8> {
        let mut parms = vec![0u8; 30];
        parms[0] = 0x01;
        parms[1] = 0x00;
        parms[2] = 0x00;
        parms[3..6].copy_from_slice(&[0x12, 0x10, 0x67]);
        parms[6..9].copy_from_slice(&[0x12, 0x10, 0x67]);
        parms[9] = 0x22;
        parms[10] = 0x53;
        parms[11..13].copy_from_slice(&10u16.to_be_bytes());
        parms[13..15].copy_from_slice(&2u16.to_be_bytes());
        parms[15..17].copy_from_slice(&1u16.to_be_bytes());
        parms[18] = 0x29;
        parms[19] = 0x00;
        let mut owner = CP037.encode("PHIL").unwrap();
        owner.resize(8, 0x40);
        parms[20..28].copy_from_slice(&owner);
        parms
    }

    #[test]
    fn test_eyecatcher_sniff() {
        assert!(looks_like_iebcopy(&copyr1_record(0x90, 80, 3200)));
        let mut prefixed = vec![0u8; 8];
        prefixed.extend_from_slice(&copyr1_record(0x90, 80, 3200));
        assert!(looks_like_iebcopy(&prefixed));
        assert!(!looks_like_iebcopy(b"NOT A PDS UNLOAD"));
    }

    #[test]
    fn test_full_decode_fixed_members() {
        let records = vec![
            copyr1_record(0x90, 80, 3200),
            copyr2_record(),
            directory_block(&[
                ("ALPHA", 0x000102, false, &ispf_parms()),
                ("BETA", 0x000203, false, &[]),
            ]),
            data_group(0x000102, &[0xC1; 160]),
            data_group(0x000203, &[0xC2; 80]),
            data_group(0x000203, &[0xC2; 80]),
        ];
        let output = decode(&records, &CP037, &DecodeConfig::default()).unwrap();
        assert_eq!(output.org, DatasetOrg::Partitioned);
        assert_eq!(output.recfm.to_string(), "FB");
        assert_eq!(output.lrecl, 80);
        assert_eq!(output.members.len(), 2);

        let alpha = &output.members[0];
        assert_eq!(alpha.name, "ALPHA");
        assert_eq!(alpha.data.len(), 160);
        assert_eq!(alpha.records.len(), 2);
        let stats = alpha.ispf.as_ref().unwrap();
        assert_eq!(stats.version, "01.00");
        assert_eq!(stats.owner, "PHIL");
        assert_eq!(stats.lines, 10);
        assert_eq!(
            iso_micros(&stats.modified.unwrap()),
            "2021-03-08T22:53:29.000000"
        );
        assert_eq!(
            stats.created.unwrap().to_string(),
            "2021-03-08"
        );

        let beta = &output.members[1];
        assert_eq!(beta.data.len(), 160);
        assert!(beta.ispf.is_none());
        // Total member bytes equal the sum of group lengths.
        let total: usize = output.members.iter().map(|m| m.data.len()).sum();
        assert_eq!(total, 320);
    }

    #[test]
    fn test_missing_eyecatcher() {
        let records = vec![vec![0u8; 56], copyr2_record()];
        let failure = decode(&records, &CP037, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(
            failure.error,
            ArchiveError::MalformedRecord { .. }
        ));
    }

    #[test]
    fn test_truncated_after_copyr1_keeps_descriptor() {
        let records = vec![copyr1_record(0x90, 80, 3200)];
        let failure = decode(&records, &CP037, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(failure.error, ArchiveError::Truncated { .. }));
        let copyr1 = failure.partial.copyr1.as_ref().unwrap();
        assert_eq!(copyr1.get_int("DS1LRECL"), Some(80));
        assert_eq!(copyr1.get_str("DS1RECFM"), Some("FB"));
    }

    #[test]
    fn test_orphan_data_is_kept() {
        let records = vec![
            copyr1_record(0x90, 80, 80),
            copyr2_record(),
            directory_block(&[("ONLY", 0x000101, false, &[])]),
            data_group(0x000101, &[0xC1; 80]),
            data_group(0x000999, &[0xC2; 80]),
        ];
        let output = decode(&records, &CP037, &DecodeConfig::default()).unwrap();
        assert_eq!(output.members.len(), 2);
        assert_eq!(output.members[1].name, "__ORPHAN_000999__");
        assert!(output
            .warnings
            .iter()
            .any(|w| w.contains("no directory entry")));
    }

    #[test]
    fn test_alias_promotion_and_sharing() {
        let records = vec![
            copyr1_record(0x90, 80, 80),
            copyr2_record(),
            directory_block(&[
                ("REAL", 0x000101, false, &[]),
                ("NICK", 0x000101, true, &[]),
                ("LONER", 0x000303, true, &[]),
            ]),
            data_group(0x000101, &[0xC1; 80]),
            data_group(0x000303, &[0xC3; 80]),
        ];
        let output = decode(&records, &CP037, &DecodeConfig::default()).unwrap();
        // NICK stays an alias with no duplicated data.
        let nick = output.members.iter().find(|m| m.name == "NICK").unwrap();
        assert!(nick.alias);
        assert!(nick.data.is_empty());
        // LONER's TTR owned real data, so it is promoted.
        let loner = output.members.iter().find(|m| m.name == "LONER").unwrap();
        assert!(!loner.alias);
        assert_eq!(loner.data.len(), 80);
    }

    #[test]
    fn test_variable_member_deblocking() {
        // VB members: each data group payload is one BDW-framed block.
        let mut block = vec![0x00, 0x11, 0x00, 0x00];
        block.extend_from_slice(&[0x00, 0x0D, 0x00, 0x00]);
        block.extend_from_slice(b"VARIABLE!");
        let records = vec![
            copyr1_record(0x50, 255, 3200),
            copyr2_record(),
            directory_block(&[("VMEM", 0x000104, false, &[])]),
            data_group(0x000104, &block),
        ];
        let output = decode(&records, &CP037, &DecodeConfig::default()).unwrap();
        let vmem = &output.members[0];
        assert_eq!(vmem.records, vec![b"VARIABLE!".to_vec()]);
        assert_eq!(vmem.data, b"VARIABLE!".to_vec());
    }
}
