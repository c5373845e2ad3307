//! Record format (RECFM) handling and the block/record engine.
//!
//! A dataset's RECFM, LRECL, and BLKSIZE govern how a stream of physical
//! blocks maps to logical records:
//!
//! - **F / FB** — fixed-length records; a block holds 1..n records of
//!   exactly LRECL bytes.
//! - **V / VB** — each block leads with a 4-byte block descriptor word
//!   (BDW: 2-byte big-endian length including itself, 2 reserved bytes);
//!   each record leads with a 4-byte record descriptor word (RDW, same
//!   layout, length includes the RDW).
//! - **VS / VBS** — spanned: the third RDW byte is a segment indicator
//!   (0 complete, 1 first, 2 last, 3 middle) and logical records are the
//!   concatenation of segments across blocks.
//! - **U** — one block is one record.
//!
//! ANSI (`A`) / machine (`M`) carriage-control suffixes only matter when
//! printing; the engine carries them through untouched.

use std::fmt;

use crate::error::{ArchiveError, Result};

/// Base record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordKind {
    /// Fixed-length records.
    #[default]
    Fixed,
    /// Variable-length records with RDW prefixes.
    Variable,
    /// Undefined: block boundaries are record boundaries.
    Undefined,
}

/// A parsed RECFM value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordFormat {
    pub kind: RecordKind,
    /// `B` — multiple records per block.
    pub blocked: bool,
    /// `S` — records may span blocks (variable formats only).
    pub spanned: bool,
    /// `A` — ANSI carriage control in column 1.
    pub ansi: bool,
    /// `M` — machine carriage control in column 1.
    pub machine: bool,
}

impl RecordFormat {
    /// Parse a RECFM string such as "FB", "VBS", or "FBA".
    pub fn parse(s: &str) -> Option<Self> {
        let mut format = RecordFormat::default();
        let mut chars = s.trim().chars().map(|c| c.to_ascii_uppercase());
        format.kind = match chars.next()? {
            'F' => RecordKind::Fixed,
            'V' => RecordKind::Variable,
            'U' => RecordKind::Undefined,
            _ => return None,
        };
        for c in chars {
            match c {
                'B' => format.blocked = true,
                'S' => format.spanned = true,
                'A' => format.ansi = true,
                'M' => format.machine = true,
                _ => return None,
            }
        }
        Some(format)
    }

    /// Decode the DS1RECFM byte: bits 7-6 carry the format (10 F, 01 V,
    /// 11 U), bit 4 blocked, bit 3 spanned, bits 2-1 ANSI/machine carriage.
    pub fn from_ds1_byte(flag: u8) -> Self {
        let kind = match flag & 0xC0 {
            0x40 => RecordKind::Variable,
            0xC0 => RecordKind::Undefined,
            _ => RecordKind::Fixed,
        };
        RecordFormat {
            kind,
            blocked: flag & 0x10 != 0,
            spanned: flag & 0x08 != 0,
            ansi: flag & 0x04 != 0,
            machine: flag & 0x02 != 0,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.kind == RecordKind::Fixed
    }

    pub fn is_variable(&self) -> bool {
        self.kind == RecordKind::Variable
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.kind {
            RecordKind::Fixed => 'F',
            RecordKind::Variable => 'V',
            RecordKind::Undefined => 'U',
        };
        write!(f, "{base}")?;
        if self.blocked {
            write!(f, "B")?;
        }
        if self.ansi {
            write!(f, "A")?;
        }
        if self.machine {
            write!(f, "M")?;
        }
        if self.spanned {
            write!(f, "S")?;
        }
        Ok(())
    }
}

/// Spanned-record segment indicator (third RDW byte).
const SEG_COMPLETE: u8 = 0;
const SEG_FIRST: u8 = 1;
const SEG_LAST: u8 = 2;
const SEG_MIDDLE: u8 = 3;

/// Deblock a stream of physical blocks into logical records.
pub fn deblock(format: RecordFormat, lrecl: u32, blocks: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
    match format.kind {
        RecordKind::Fixed => deblock_fixed(lrecl, blocks),
        RecordKind::Variable => deblock_variable(format, blocks),
        RecordKind::Undefined => Ok(blocks.to_vec()),
    }
}

fn deblock_fixed(lrecl: u32, blocks: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
    let lrecl = lrecl as usize;
    let mut records = Vec::new();
    for block in blocks {
        if lrecl == 0 {
            records.push(block.clone());
            continue;
        }
        for chunk in block.chunks(lrecl) {
            records.push(chunk.to_vec());
        }
    }
    Ok(records)
}

fn deblock_variable(format: RecordFormat, blocks: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
    let mut records = Vec::new();
    // Segment of a spanned record carried over from earlier blocks.
    let mut pending: Option<Vec<u8>> = None;
    let mut offset = 0usize;

    for block in blocks {
        if block.len() < 4 {
            return Err(ArchiveError::MalformedRecord {
                offset,
                detail: format!("block of {} bytes is too short for a BDW", block.len()),
            });
        }
        let bdw_len = usize::from(u16::from_be_bytes([block[0], block[1]]));
        if bdw_len < 4 || bdw_len > block.len() {
            return Err(ArchiveError::MalformedRecord {
                offset,
                detail: format!(
                    "BDW length {bdw_len} inconsistent with block of {} bytes",
                    block.len()
                ),
            });
        }

        let mut pos = 4;
        while pos < bdw_len {
            if pos + 4 > bdw_len {
                return Err(ArchiveError::MalformedRecord {
                    offset: offset + pos,
                    detail: "RDW does not fit in block".to_string(),
                });
            }
            let rdw_len = usize::from(u16::from_be_bytes([block[pos], block[pos + 1]]));
            let segment = block[pos + 2];
            if rdw_len < 4 || pos + rdw_len > bdw_len {
                return Err(ArchiveError::MalformedRecord {
                    offset: offset + pos,
                    detail: format!("RDW length {rdw_len} inconsistent with BDW"),
                });
            }
            let data = &block[pos + 4..pos + rdw_len];

            match (segment, format.spanned) {
                (SEG_COMPLETE, _) => {
                    if pending.is_some() {
                        return Err(ArchiveError::MalformedRecord {
                            offset: offset + pos,
                            detail: "complete record inside an open spanned record".to_string(),
                        });
                    }
                    records.push(data.to_vec());
                }
                (SEG_FIRST, true) => {
                    if pending.is_some() {
                        return Err(ArchiveError::MalformedRecord {
                            offset: offset + pos,
                            detail: "first segment inside an open spanned record".to_string(),
                        });
                    }
                    pending = Some(data.to_vec());
                }
                (SEG_MIDDLE, true) => match pending.as_mut() {
                    Some(buf) => buf.extend_from_slice(data),
                    None => {
                        return Err(ArchiveError::MalformedRecord {
                            offset: offset + pos,
                            detail: "middle segment with no open spanned record".to_string(),
                        })
                    }
                },
                (SEG_LAST, true) => match pending.take() {
                    Some(mut buf) => {
                        buf.extend_from_slice(data);
                        records.push(buf);
                    }
                    None => {
                        return Err(ArchiveError::MalformedRecord {
                            offset: offset + pos,
                            detail: "last segment with no open spanned record".to_string(),
                        })
                    }
                },
                (seg, false) => {
                    return Err(ArchiveError::MalformedRecord {
                        offset: offset + pos,
                        detail: format!("segment indicator {seg} in unspanned format"),
                    })
                }
                (seg, true) => {
                    return Err(ArchiveError::MalformedRecord {
                        offset: offset + pos,
                        detail: format!("unknown segment indicator {seg}"),
                    })
                }
            }
            pos += rdw_len;
        }
        offset += block.len();
    }

    if pending.is_some() {
        return Err(ArchiveError::MalformedRecord {
            offset,
            detail: "input ended inside a spanned record".to_string(),
        });
    }
    Ok(records)
}

/// Reblock logical records into physical blocks, the inverse of
/// [`deblock`].
pub fn reblock(
    format: RecordFormat,
    lrecl: u32,
    blksize: u32,
    records: &[Vec<u8>],
) -> Result<Vec<Vec<u8>>> {
    match format.kind {
        RecordKind::Fixed => reblock_fixed(format, lrecl, blksize, records),
        RecordKind::Variable => reblock_variable(format, blksize, records),
        RecordKind::Undefined => Ok(records.to_vec()),
    }
}

fn reblock_fixed(
    format: RecordFormat,
    lrecl: u32,
    blksize: u32,
    records: &[Vec<u8>],
) -> Result<Vec<Vec<u8>>> {
    let lrecl = lrecl as usize;
    for record in records {
        if record.len() != lrecl {
            return Err(ArchiveError::MalformedRecord {
                offset: 0,
                detail: format!(
                    "fixed record of {} bytes does not match LRECL {lrecl}",
                    record.len()
                ),
            });
        }
    }
    let per_block = if format.blocked && lrecl > 0 {
        ((blksize as usize / lrecl).max(1)).min(records.len().max(1))
    } else {
        1
    };
    Ok(records
        .chunks(per_block)
        .map(|chunk| chunk.concat())
        .collect())
}

fn reblock_variable(
    format: RecordFormat,
    blksize: u32,
    records: &[Vec<u8>],
) -> Result<Vec<Vec<u8>>> {
    let blksize = (blksize as usize).max(12);
    let max_segment = blksize - 8;

    // Cut each record into (segment-indicator, payload) pieces.
    let mut segments: Vec<(u8, &[u8])> = Vec::new();
    for record in records {
        if record.len() <= max_segment || !format.spanned {
            if record.len() > max_segment {
                return Err(ArchiveError::MalformedRecord {
                    offset: 0,
                    detail: format!(
                        "record of {} bytes exceeds block size {blksize} and format is not spanned",
                        record.len()
                    ),
                });
            }
            segments.push((SEG_COMPLETE, record));
        } else {
            let mut chunks = record.chunks(max_segment).peekable();
            let mut first = true;
            while let Some(chunk) = chunks.next() {
                let seg = match (first, chunks.peek().is_some()) {
                    (true, _) => SEG_FIRST,
                    (false, true) => SEG_MIDDLE,
                    (false, false) => SEG_LAST,
                };
                segments.push((seg, chunk));
                first = false;
            }
        }
    }

    // Pack segments into blocks.
    let mut blocks = Vec::new();
    let mut body: Vec<u8> = Vec::new();
    for (seg, data) in segments {
        let rdw_len = data.len() + 4;
        let fits = 4 + body.len() + rdw_len <= blksize;
        if !body.is_empty() && (!format.blocked || !fits) {
            blocks.push(finish_block(std::mem::take(&mut body)));
        }
        body.extend_from_slice(&(rdw_len as u16).to_be_bytes());
        body.push(seg);
        body.push(0);
        body.extend_from_slice(data);
    }
    if !body.is_empty() {
        blocks.push(finish_block(body));
    }
    Ok(blocks)
}

fn finish_block(body: Vec<u8>) -> Vec<u8> {
    let mut block = Vec::with_capacity(body.len() + 4);
    block.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
    block.extend_from_slice(&[0, 0]);
    block.extend_from_slice(&body);
    block
}
