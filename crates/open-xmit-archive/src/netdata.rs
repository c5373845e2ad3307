//! NETDATA (XMI) framing: segment reassembly and INMR## control records.
//!
//! A TRANSMIT file is a run of length-prefixed segments. Each segment is
//! `length (1 byte) | flags (1 byte) | data`, where the length includes the
//! two header bytes. Flag 0x20 marks a control-record segment; 0x80 and
//! 0x40 mark the first and last segment of a logical record. Control
//! records lead with a 6-byte EBCDIC tag:
//!
//! - **INMR01** — header: origin/target node and user, timestamp.
//! - **INMR02** — one per unload step: utility name plus file attributes.
//!   A PDS arrives as IEBCOPY followed by INMCOPY; a sequential dataset or
//!   message as INMCOPY alone.
//! - **INMR03** — data-format descriptor, one per data stream.
//! - **INMR04** — installation-exit payload, captured opaquely.
//! - **INMR06** — terminator.
//! - **INMR07** — notification, ignored.

use tracing::{debug, trace};

use crate::config::DecodeConfig;
use crate::cursor::{be_uint, ByteCursor};
use crate::error::{ArchiveError, Result};
use crate::model::{ControlRecordMeta, DatasetOrg, MetaValue};
use crate::recfm::RecordFormat;
use crate::textunit::{parse_text_units, TextUnit, TextUnitValue};
use open_xmit_encoding::CodePage;

/// Segment flag bits.
const SEG_FIRST: u8 = 0x80;
const SEG_LAST: u8 = 0x40;
const SEG_CONTROL: u8 = 0x20;

/// Archive-level fields gathered from INMR01.
#[derive(Debug, Default)]
pub(crate) struct XmiHeader {
    pub timestamp: Option<chrono::NaiveDateTime>,
    pub origin_node: Option<String>,
    pub origin_user: Option<String>,
    pub target_node: Option<String>,
    pub target_user: Option<String>,
    pub num_files: Option<u64>,
}

/// One INMR02 file descriptor.
#[derive(Debug)]
pub(crate) struct FileDescriptor {
    pub utility: String,
    pub dsname: Option<String>,
    pub org: Option<DatasetOrg>,
    pub recfm: Option<RecordFormat>,
    pub lrecl: Option<u32>,
    pub blksize: Option<u32>,
    pub size: Option<u64>,
    pub created: Option<chrono::NaiveDateTime>,
    /// INMTERM present: this descriptor is the transmitted message.
    pub is_message: bool,
}

/// One INMR03 data-format descriptor.
#[derive(Debug, Default)]
pub(crate) struct StreamFormat {
    pub lrecl: Option<u32>,
}

/// Everything the segment walk produces.
#[derive(Debug)]
pub(crate) struct XmiScan {
    pub header: XmiHeader,
    pub descriptors: Vec<FileDescriptor>,
    pub formats: Vec<StreamFormat>,
    /// Logical records per data stream, one stream per INMR03.
    pub streams: Vec<Vec<Vec<u8>>>,
    pub controls: Vec<ControlRecordMeta>,
    pub saw_terminator: bool,
    pub warnings: Vec<String>,
}

/// Walk the segments of an XMI buffer.
pub(crate) fn scan(data: &[u8], config: &DecodeConfig, codec: &CodePage) -> Result<XmiScan> {
    let mut cursor = ByteCursor::new(data);
    let mut scan = XmiScan {
        header: XmiHeader::default(),
        descriptors: Vec::new(),
        formats: Vec::new(),
        streams: Vec::new(),
        controls: Vec::new(),
        saw_terminator: false,
        warnings: Vec::new(),
    };
    let mut inmr02_index = 0usize;
    let mut inmr03_index = 0usize;
    let mut record: Vec<u8> = Vec::new();

    while !cursor.is_eof() {
        let offset = cursor.position();
        let length = usize::from(cursor.read_u8()?);
        let flags = cursor.read_u8()?;
        if length < 2 {
            return Err(ArchiveError::MalformedRecord {
                offset,
                detail: format!("segment length {length} is impossible"),
            });
        }
        let body = cursor.read_slice(length - 2)?;

        if flags & SEG_CONTROL != 0 {
            if body.len() < 6 {
                return Err(ArchiveError::MalformedRecord {
                    offset,
                    detail: "control segment shorter than its tag".to_string(),
                });
            }
            let tag = codec.decode(&body[..6]);
            trace!(offset, tag = %tag, "control record");
            match tag.as_str() {
                "INMR01" => {
                    let units = parse_text_units(&body[6..], codec)?;
                    scan.header = header_from_units(&units);
                    scan.controls.push(meta_from_units("INMR01", &units));
                }
                "INMR02" => {
                    if body.len() < 10 {
                        return Err(ArchiveError::MalformedRecord {
                            offset,
                            detail: "INMR02 missing its file-number word".to_string(),
                        });
                    }
                    let number = be_uint(&body[6..10]);
                    let units = parse_text_units(&body[10..], codec)?;
                    let descriptor = descriptor_from_units(&units)?;
                    inmr02_index += 1;
                    let mut meta = meta_from_units(&format!("INMR02/{inmr02_index}"), &units);
                    meta.set("numfile", MetaValue::Int(number));
                    scan.controls.push(meta);
                    scan.descriptors.push(descriptor);
                }
                "INMR03" => {
                    let units = parse_text_units(&body[6..], codec)?;
                    inmr03_index += 1;
                    scan.controls
                        .push(meta_from_units(&format!("INMR03/{inmr03_index}"), &units));
                    scan.formats.push(StreamFormat {
                        lrecl: units
                            .iter()
                            .find(|u| u.name == Some("INMLRECL"))
                            .and_then(TextUnit::as_int)
                            .map(|n| n as u32),
                    });
                    scan.streams.push(Vec::new());
                }
                "INMR04" => {
                    let mut meta = ControlRecordMeta::new("INMR04");
                    meta.set("data", MetaValue::Bytes(body[6..].to_vec()));
                    scan.controls.push(meta);
                }
                "INMR06" => {
                    debug!(offset, "INMR06 terminator");
                    scan.saw_terminator = true;
                    break;
                }
                "INMR07" => {}
                other => {
                    scan.warnings
                        .push(format!("unrecognized control record '{other}' at offset {offset}"));
                }
            }
        } else {
            // Data segment: part of the current INMCOPY stream.
            record.extend_from_slice(body);
            if record.len() > config.max_record_bytes {
                return Err(ArchiveError::PolicyViolation {
                    size: record.len(),
                    limit: config.max_record_bytes,
                });
            }
            let first = flags & SEG_FIRST != 0;
            let last = flags & SEG_LAST != 0;
            trace!(offset, len = body.len(), first, last, "data segment");
            if last {
                let complete = std::mem::take(&mut record);
                match scan.streams.last_mut() {
                    Some(stream) => stream.push(complete),
                    None => {
                        return Err(ArchiveError::MalformedRecord {
                            offset,
                            detail: "data record before any INMR03".to_string(),
                        })
                    }
                }
            }
        }
    }

    if scan.controls.iter().all(|c| c.name != "INMR01") {
        return Err(ArchiveError::MalformedRecord {
            offset: 0,
            detail: "no INMR01 header record".to_string(),
        });
    }
    if scan.descriptors.is_empty() {
        return Err(ArchiveError::MalformedRecord {
            offset: cursor.position(),
            detail: "no INMR02 file descriptors".to_string(),
        });
    }
    if !scan.saw_terminator {
        scan.warnings
            .push("input ended without an INMR06 terminator".to_string());
    }
    if !record.is_empty() {
        scan.warnings
            .push("input ended inside an unterminated data record".to_string());
    }
    Ok(scan)
}

fn header_from_units(units: &[TextUnit]) -> XmiHeader {
    let find = |name: &str| units.iter().find(|u| u.name == Some(name));
    XmiHeader {
        timestamp: find("INMFTIME").and_then(TextUnit::as_timestamp),
        origin_node: find("INMFNODE").and_then(|u| u.as_str().map(str::to_string)),
        origin_user: find("INMFUID").and_then(|u| u.as_str().map(str::to_string)),
        target_node: find("INMTNODE").and_then(|u| u.as_str().map(str::to_string)),
        target_user: find("INMTUID").and_then(|u| u.as_str().map(str::to_string)),
        num_files: find("INMNUMF").and_then(TextUnit::as_int),
    }
}

fn descriptor_from_units(units: &[TextUnit]) -> Result<FileDescriptor> {
    let find = |name: &str| units.iter().find(|u| u.name == Some(name));

    let utility = find("INMUTILN")
        .and_then(|u| u.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    match utility.as_str() {
        "INMCOPY" | "IEBCOPY" => {}
        other => return Err(ArchiveError::UnsupportedUtility(other.to_string())),
    }

    Ok(FileDescriptor {
        utility,
        dsname: find("INMDSNAM").and_then(TextUnit::joined),
        org: find("INMDSORG").and_then(|u| match u.values.first() {
            Some(TextUnitValue::Bytes(b)) => Some(dsorg_from_bits(be_uint(b) as u16)),
            _ => None,
        }),
        recfm: find("INMRECFM").and_then(|u| match u.values.first() {
            Some(TextUnitValue::Bytes(b)) if !b.is_empty() => {
                Some(RecordFormat::from_ds1_byte(b[0]))
            }
            _ => None,
        }),
        lrecl: find("INMLRECL").and_then(TextUnit::as_int).map(|n| n as u32),
        blksize: find("INMBLKSZ").and_then(TextUnit::as_int).map(|n| n as u32),
        size: find("INMSIZE").and_then(TextUnit::as_int),
        created: find("INMCREAT").and_then(TextUnit::as_timestamp),
        is_message: find("INMTERM").is_some(),
    })
}

/// Translate DSORG bits to an organization.
pub(crate) fn dsorg_from_bits(bits: u16) -> DatasetOrg {
    if bits & 0x0200 != 0 {
        DatasetOrg::Partitioned
    } else {
        DatasetOrg::Sequential
    }
}

/// Build a verbatim metadata bag from decoded text units.
fn meta_from_units(name: &str, units: &[TextUnit]) -> ControlRecordMeta {
    let mut meta = ControlRecordMeta::new(name);
    for unit in units {
        let key = match unit.name {
            Some(known) => known.to_string(),
            None => format!("{:#06x}", unit.key),
        };
        let value = match unit.values.len() {
            0 => MetaValue::Bool(true),
            1 => match &unit.values[0] {
                TextUnitValue::Str(s) => MetaValue::Str(s.clone()),
                TextUnitValue::Int(n) => MetaValue::Int(*n),
                TextUnitValue::Bytes(b) => MetaValue::Bytes(b.clone()),
                TextUnitValue::Timestamp(t) => MetaValue::Timestamp(*t),
            },
            _ => match unit.joined() {
                Some(joined) => MetaValue::Str(joined),
                None => MetaValue::Bytes(
                    unit.values
                        .iter()
                        .flat_map(|v| match v {
                            TextUnitValue::Bytes(b) => b.clone(),
                            _ => Vec::new(),
                        })
                        .collect(),
                ),
            },
        };
        meta.set(key, value);
    }
    meta
}

/// A logical file within the XMI: its descriptors and its data stream.
#[derive(Debug)]
pub(crate) struct LogicalFile {
    /// Primary descriptor: the IEBCOPY step for a PDS, otherwise INMCOPY.
    pub primary: usize,
    /// Transport descriptor index (INMCOPY step), when distinct.
    pub transport: Option<usize>,
    pub is_message: bool,
}

/// Group INMR02 descriptors into logical files. A partitioned dataset
/// contributes an IEBCOPY descriptor immediately followed by its INMCOPY
/// transport descriptor; everything else stands alone.
pub(crate) fn group_descriptors(descriptors: &[FileDescriptor]) -> Vec<LogicalFile> {
    let mut files = Vec::new();
    let mut i = 0;
    while i < descriptors.len() {
        if descriptors[i].utility == "IEBCOPY" {
            let transport = if i + 1 < descriptors.len()
                && descriptors[i + 1].utility == "INMCOPY"
                && descriptors[i + 1].dsname == descriptors[i].dsname
            {
                i += 1;
                Some(i)
            } else {
                None
            };
            files.push(LogicalFile {
                primary: i - usize::from(transport.is_some()),
                transport,
                is_message: false,
            });
        } else {
            files.push(LogicalFile {
                primary: i,
                transport: None,
                is_message: descriptors[i].is_message
                    || (files.is_empty()
                        && descriptors[i].dsname.is_none()
                        && descriptors.len() > i + 1),
            });
        }
        i += 1;
    }
    files
}
