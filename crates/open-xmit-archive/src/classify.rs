//! Text-vs-binary classification, EBCDIC text conversion, and the
//! sequence-number column strip.
//!
//! Classification looks at the first 4 KiB of a stream. Fixed-format data
//! with a sane LRECL whose decoded bytes are overwhelmingly printable is
//! text; otherwise a small content sniff decides. Text streams are decoded
//! record by record; fixed-80 records optionally lose their rightmost
//! 8-column sequence number when it is all digits or spaces.

use crate::config::DecodeConfig;
use crate::model::ContentKind;
use crate::recfm::{RecordFormat, RecordKind};
use open_xmit_encoding::CodePage;

/// How much of a stream the classifier examines.
const SNIFF_WINDOW: usize = 4096;
/// Printable fraction required to call fixed-format data text.
const PRINTABLE_THRESHOLD: f64 = 0.95;

/// Classification result for one terminal byte stream.
#[derive(Debug, Clone)]
pub(crate) struct Classified {
    pub kind: ContentKind,
    /// UTF-8 conversion, present only for text.
    pub text: Option<String>,
    /// Suggested file extension, dot included.
    pub extension: String,
}

/// Classify a stream and convert it when it turns out to be text.
pub(crate) fn classify(
    records: &[Vec<u8>],
    data: &[u8],
    recfm: RecordFormat,
    lrecl: u32,
    codec: &CodePage,
    config: &DecodeConfig,
) -> Classified {
    let mime = sniff_mime(data, codec);

    let is_text = if config.binary_only {
        false
    } else if config.force_text {
        true
    } else if recfm.kind == RecordKind::Fixed && lrecl > 0 && lrecl <= 255 {
        printable_ratio(data, codec) >= PRINTABLE_THRESHOLD
            || mime.starts_with("text/")
    } else {
        mime.starts_with("text/")
    };

    if !is_text {
        let extension = match mime {
            "application/xmit" => ".xmi",
            "application/zip" => ".zip",
            _ => ".bin",
        };
        return Classified {
            kind: ContentKind::Binary,
            text: None,
            extension: extension.to_string(),
        };
    }

    let text = convert_text(records, recfm, lrecl, codec, config);
    let extension = if is_jcl(&text) {
        ".jcl"
    } else if is_rexx(&text) {
        ".rexx"
    } else {
        ".txt"
    };
    Classified {
        kind: ContentKind::Text,
        text: Some(text),
        extension: extension.to_string(),
    }
}

/// Minimal content sniff over the stream: enough to catch the two formats
/// that routinely travel inside mainframe containers plus plain text.
pub(crate) fn sniff_mime(data: &[u8], codec: &CodePage) -> &'static str {
    if data.len() >= 8 && codec.decode(&data[2..8]) == "INMR01" {
        return "application/xmit";
    }
    if data.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }
    if !data.is_empty() && printable_ratio(data, codec) >= PRINTABLE_THRESHOLD {
        return "text/plain";
    }
    "application/octet-stream"
}

/// Fraction of the sniff window that decodes to printable ASCII or
/// whitespace.
fn printable_ratio(data: &[u8], codec: &CodePage) -> f64 {
    let window = &data[..data.len().min(SNIFF_WINDOW)];
    if window.is_empty() {
        return 0.0;
    }
    let printable = window
        .iter()
        .filter(|&&b| {
            let ch = codec.decode_byte(b);
            ch.is_ascii_graphic() || matches!(ch, ' ' | '\t' | '\n' | '\r')
        })
        .count();
    printable as f64 / window.len() as f64
}

/// Decode logical records to one UTF-8 string, one line per record.
fn convert_text(
    records: &[Vec<u8>],
    recfm: RecordFormat,
    lrecl: u32,
    codec: &CodePage,
    config: &DecodeConfig,
) -> String {
    let unnum = config.unnum && recfm.kind == RecordKind::Fixed && lrecl == 80;
    let mut out = String::new();
    for record in records {
        let line = codec.decode(record);
        let line = if unnum {
            strip_sequence_column(&line).to_string()
        } else {
            line
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Drop columns 73..80 of an exactly-80-column line when they hold only
/// digits or spaces. Stripped lines are 72 columns, so the transform is
/// idempotent.
pub(crate) fn strip_sequence_column(line: &str) -> &str {
    if line.len() == 80
        && line.is_char_boundary(72)
        && line[72..]
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b' ')
    {
        &line[..72]
    } else {
        line
    }
}

/// A JCL stream starts with a `// ... JOB` card.
fn is_jcl(text: &str) -> bool {
    let first = text.lines().next().unwrap_or("");
    let mut parts = first.split_whitespace();
    matches!(
        (parts.next(), parts.next()),
        (Some(card), Some("JOB")) if card.starts_with("//")
    )
}

/// A REXX exec starts with a comment naming the language.
fn is_rexx(text: &str) -> bool {
    let first = text.lines().next().unwrap_or("").trim_start();
    first.starts_with("/*") && first.to_uppercase().contains("REXX")
}
