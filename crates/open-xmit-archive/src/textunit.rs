//! IBM text units — the tagged values carried by INMR## control records.
//!
//! Layout per unit: 2-byte big-endian key, 2-byte big-endian value count,
//! then per value a 2-byte big-endian length followed by the value bytes.
//! Interpretation is keyed by a registry of the text units TRANSMIT is
//! documented to emit; unknown keys are preserved raw so JSON dumps stay
//! faithful.

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, trace};

use crate::cursor::{be_uint, ByteCursor};
use crate::error::Result;
use open_xmit_encoding::CodePage;

/// How a registered key's value bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// EBCDIC character data.
    Character,
    /// Unsigned big-endian integer, 1..4 bytes.
    Decimal,
    /// Raw bytes, preserved as-is.
    Hex,
    /// EBCDIC digits forming `YYYYMMDDhhmmss[uuuuuu]`.
    Timestamp,
}

/// A decoded text-unit value.
#[derive(Debug, Clone, PartialEq)]
pub enum TextUnitValue {
    Str(String),
    Int(u64),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
}

/// One decoded text unit: key, mnemonic when known, and its values.
#[derive(Debug, Clone)]
pub struct TextUnit {
    pub key: u16,
    pub name: Option<&'static str>,
    pub values: Vec<TextUnitValue>,
}

impl TextUnit {
    /// First value as a string, when it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self.values.first() {
            Some(TextUnitValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// First value as an integer, when it is one.
    pub fn as_int(&self) -> Option<u64> {
        match self.values.first() {
            Some(TextUnitValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    /// First value as a timestamp, when it is one.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self.values.first() {
            Some(TextUnitValue::Timestamp(t)) => Some(*t),
            _ => None,
        }
    }

    /// All string values joined with `.` — dataset names arrive as one
    /// value per qualifier.
    pub fn joined(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .values
            .iter()
            .filter_map(|v| match v {
                TextUnitValue::Str(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("."))
        }
    }
}

/// Registry of documented TRANSMIT text-unit keys.
#[rustfmt::skip]
static REGISTRY: &[(u16, &str, ValueKind)] = &[
    (0x0001, "INMDDNAM", ValueKind::Character),
    (0x0002, "INMDSNAM", ValueKind::Character),
    (0x0003, "INMMEMBR", ValueKind::Character),
    (0x000B, "INMSECND", ValueKind::Decimal),
    (0x000C, "INMDIR",   ValueKind::Decimal),
    (0x0022, "INMEXPDT", ValueKind::Character),
    (0x0028, "INMTERM",  ValueKind::Character),
    (0x0030, "INMBLKSZ", ValueKind::Decimal),
    (0x003C, "INMDSORG", ValueKind::Hex),
    (0x0042, "INMLRECL", ValueKind::Decimal),
    (0x0049, "INMRECFM", ValueKind::Hex),
    (0x1001, "INMTNODE", ValueKind::Character),
    (0x1002, "INMTUID",  ValueKind::Character),
    (0x1011, "INMFNODE", ValueKind::Character),
    (0x1012, "INMFUID",  ValueKind::Character),
    (0x1020, "INMLREF",  ValueKind::Character),
    (0x1021, "INMLCHG",  ValueKind::Character),
    (0x1022, "INMCREAT", ValueKind::Timestamp),
    (0x1023, "INMFVERS", ValueKind::Character),
    (0x1024, "INMFTIME", ValueKind::Timestamp),
    (0x1025, "INMTTIME", ValueKind::Timestamp),
    (0x1026, "INMFACK",  ValueKind::Character),
    (0x1027, "INMERRCD", ValueKind::Character),
    (0x1028, "INMUTILN", ValueKind::Character),
    (0x1029, "INMUSERP", ValueKind::Character),
    (0x102A, "INMRECCT", ValueKind::Character),
    (0x102C, "INMSIZE",  ValueKind::Decimal),
    (0x102F, "INMNUMF",  ValueKind::Decimal),
    (0x8012, "INMTYPE",  ValueKind::Hex),
];

fn lookup(key: u16) -> Option<(&'static str, ValueKind)> {
    REGISTRY
        .iter()
        .find(|(k, _, _)| *k == key)
        .map(|(_, name, kind)| (*name, *kind))
}

/// Parse a run of text units from a control-record body.
pub fn parse_text_units(data: &[u8], codec: &CodePage) -> Result<Vec<TextUnit>> {
    let mut cursor = ByteCursor::new(data);
    let mut units = Vec::new();

    while cursor.remaining() >= 4 {
        let key = cursor.read_u16_be()?;
        let count = cursor.read_u16_be()?;
        let entry = lookup(key);

        let mut values = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let len = usize::from(cursor.read_u16_be()?);
            let bytes = cursor.read_slice(len)?;
            values.push(interpret(bytes, entry.map(|(_, kind)| kind), codec));
        }

        trace!(
            key = %format!("{key:#06x}"),
            name = entry.map(|(name, _)| name).unwrap_or("?"),
            count,
            "text unit"
        );
        units.push(TextUnit {
            key,
            name: entry.map(|(name, _)| name),
            values,
        });
    }
    Ok(units)
}

fn interpret(bytes: &[u8], kind: Option<ValueKind>, codec: &CodePage) -> TextUnitValue {
    match kind {
        Some(ValueKind::Character) => TextUnitValue::Str(codec.decode(bytes)),
        Some(ValueKind::Decimal) => TextUnitValue::Int(be_uint(bytes)),
        Some(ValueKind::Timestamp) => {
            let digits = codec.decode(bytes);
            match parse_inm_timestamp(&digits) {
                Some(ts) => TextUnitValue::Timestamp(ts),
                None => {
                    debug!(value = %digits, "unparseable text-unit timestamp kept as string");
                    TextUnitValue::Str(digits)
                }
            }
        }
        Some(ValueKind::Hex) | None => TextUnitValue::Bytes(bytes.to_vec()),
    }
}

/// Parse a TRANSMIT timestamp: `YYYYMMDDhhmmss` optionally followed by up
/// to six fractional-second digits.
pub fn parse_inm_timestamp(digits: &str) -> Option<NaiveDateTime> {
    let digits = digits.trim();
    if digits.len() < 14 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = |range: std::ops::Range<usize>| digits[range].parse::<u32>().ok();
    let date = NaiveDate::from_ymd_opt(
        digits[0..4].parse().ok()?,
        field(4..6)?,
        field(6..8)?,
    )?;
    let time = date.and_hms_opt(field(8..10)?, field(10..12)?, field(12..14)?)?;
    // Right-pad the fraction to microseconds.
    let mut frac = digits[14..].to_string();
    if frac.len() > 6 {
        frac.truncate(6);
    }
    while frac.len() < 6 {
        frac.push('0');
    }
    let micros: u32 = frac.parse().ok()?;
    time.checked_add_signed(chrono::Duration::microseconds(i64::from(micros)))
}
