//! EBCDIC code page support for OpenXMIT.
//!
//! Everything a NETDATA or tape decoder reads that is human-readable —
//! dataset names, member names, label fields, text-unit strings, ISPF owner
//! IDs, and (when so classified) record payloads — is EBCDIC. This crate
//! provides the code page tables used to translate those bytes to Unicode
//! and, for the fixed subset needed when writing label text back, the
//! reverse direction.
//!
//! # Supported code pages
//!
//! - **CP037** — US/Canada base page
//! - **CP500** — International
//! - **CP1047** — Latin-1 / Open Systems
//! - **CP1140 / CP1148** — Euro-enabled variants of CP037 and CP500
//!
//! The decode tables are total: all 256 byte values map to a legal Unicode
//! scalar, so decoding never fails and never substitutes a replacement
//! character. Each table is a bijection onto its character repertoire, which
//! makes encode-after-decode the identity on the full byte alphabet.
//!
//! # Example
//!
//! ```rust
//! use open_xmit_encoding::{CodePage, CP1140};
//!
//! let text = CP1140.decode(&[0xC8, 0xC5, 0xD3, 0xD3, 0xD6]);
//! assert_eq!(text, "HELLO");
//! assert_eq!(CP1140.encode("HELLO").unwrap(), vec![0xC8, 0xC5, 0xD3, 0xD3, 0xD6]);
//!
//! let page = CodePage::by_name("cp1140").unwrap();
//! assert_eq!(page.ccsid, 1140);
//! ```

mod tables;

pub use tables::{CP037, CP1047, CP1140, CP1148, CP500};

use thiserror::Error;

/// Errors returned by encoding operations.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// Requested code page is not shipped.
    #[error("unknown EBCDIC code page '{0}'")]
    UnknownCodePage(String),

    /// A character has no position in the target code page.
    #[error("character '{ch}' (U+{scalar:04X}) cannot be encoded in {page}")]
    Unmappable { ch: char, scalar: u32, page: &'static str },
}

/// Result type for encoding operations.
pub type Result<T> = std::result::Result<T, EncodingError>;

/// An EBCDIC code page: a total mapping from the 256 byte values to Unicode
/// scalars.
pub struct CodePage {
    /// Page name, e.g. "CP1140".
    pub name: &'static str,
    /// IBM coded character set identifier.
    pub ccsid: u16,
    /// EBCDIC byte to Unicode scalar. Entries never exceed U+00FF except the
    /// Euro sign on the CP114x pages.
    table: [u16; 256],
}

/// All shipped code pages, used for registry lookups.
static ALL_PAGES: &[&CodePage] = &[&CP037, &CP500, &CP1047, &CP1140, &CP1148];

impl CodePage {
    /// Decode EBCDIC bytes to a `String`.
    ///
    /// Total: every byte value has a mapping, so this cannot fail.
    pub fn decode(&self, bytes: &[u8]) -> String {
        bytes.iter().map(|&b| self.decode_byte(b)).collect()
    }

    /// Decode a single EBCDIC byte to its Unicode character.
    #[inline]
    pub fn decode_byte(&self, b: u8) -> char {
        // Table entries are all legal scalars (<= U+20AC, none in the
        // surrogate range), so the conversion cannot fail.
        char::from_u32(u32::from(self.table[b as usize])).unwrap_or('\u{FFFD}')
    }

    /// Encode a string to EBCDIC bytes.
    ///
    /// # Errors
    /// Returns [`EncodingError::Unmappable`] for characters with no position
    /// in this code page.
    pub fn encode(&self, s: &str) -> Result<Vec<u8>> {
        s.chars()
            .map(|ch| {
                self.encode_char(ch).ok_or(EncodingError::Unmappable {
                    ch,
                    scalar: ch as u32,
                    page: self.name,
                })
            })
            .collect()
    }

    /// Encode a single character, if it has a position in this page.
    pub fn encode_char(&self, ch: char) -> Option<u8> {
        let scalar = ch as u32;
        if scalar > u32::from(u16::MAX) {
            return None;
        }
        let want = scalar as u16;
        self.table.iter().position(|&u| u == want).map(|i| i as u8)
    }

    /// Look up a shipped code page by name.
    ///
    /// Accepts the forms "cp1140", "CP1140", "IBM-1140", "IBM1140", and
    /// "EBCDIC-1140".
    ///
    /// # Errors
    /// Returns [`EncodingError::UnknownCodePage`] for unrecognized names.
    pub fn by_name(name: &str) -> Result<&'static CodePage> {
        let upper = name.to_uppercase();
        let digits = upper
            .trim_start_matches("EBCDIC-")
            .trim_start_matches("IBM-")
            .trim_start_matches("IBM")
            .trim_start_matches("CP");
        let ccsid: u16 = digits
            .parse()
            .map_err(|_| EncodingError::UnknownCodePage(name.to_string()))?;
        Self::from_ccsid(ccsid).map_err(|_| EncodingError::UnknownCodePage(name.to_string()))
    }

    /// Look up a shipped code page by CCSID number.
    ///
    /// # Errors
    /// Returns [`EncodingError::UnknownCodePage`] for unrecognized CCSIDs.
    pub fn from_ccsid(ccsid: u16) -> Result<&'static CodePage> {
        ALL_PAGES
            .iter()
            .find(|p| p.ccsid == ccsid)
            .copied()
            .ok_or_else(|| EncodingError::UnknownCodePage(format!("CCSID {ccsid}")))
    }
}

impl std::fmt::Debug for CodePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodePage")
            .field("name", &self.name)
            .field("ccsid", &self.ccsid)
            .finish_non_exhaustive()
    }
}
