//! Decoder error types.

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while decoding XMI, AWS/HET, or IEBCOPY streams.
///
/// `Truncated`, `MalformedRecord`, and `PolicyViolation` abort the decode;
/// unsupported features and orphaned member data are recorded as warnings on
/// the [`Archive`](crate::Archive) instead.
#[derive(Debug, Error, Diagnostic)]
pub enum ArchiveError {
    /// A read ran past the end of the input buffer.
    #[error("truncated input at offset {offset}: need {need} bytes, have {have}")]
    #[diagnostic(code(open_xmit::truncated))]
    Truncated {
        offset: usize,
        need: usize,
        have: usize,
    },

    /// The root sniff matched neither XMI nor a virtual tape header.
    #[error("input is not an XMI or AWS/HET virtual tape file")]
    #[diagnostic(code(open_xmit::unknown_container))]
    UnknownContainer,

    /// Structural damage: bad BDW/RDW, bad segment order, missing
    /// eye-catcher, or an impossible length field.
    #[error("malformed record at offset {offset}: {detail}")]
    #[diagnostic(code(open_xmit::malformed_record))]
    MalformedRecord { offset: usize, detail: String },

    /// The INMR02 names an unload utility this decoder cannot handle
    /// (AMSCIPHR-encrypted payloads in particular).
    #[error("unsupported unload utility '{0}'")]
    #[diagnostic(code(open_xmit::unsupported_utility))]
    UnsupportedUtility(String),

    /// Recognized but unsupported: compression on plain AWS, nested
    /// containers beyond the depth cap, full PDSE fidelity.
    #[error("unsupported feature: {0}")]
    #[diagnostic(code(open_xmit::unsupported_feature))]
    UnsupportedFeature(String),

    /// EBCDIC code page lookup or conversion failed.
    #[error("decoding error: {0}")]
    #[diagnostic(code(open_xmit::decoding))]
    Decoding(#[from] open_xmit_encoding::EncodingError),

    /// A single record would exceed the configured allocation cap.
    #[error("record of {size} bytes exceeds the {limit}-byte cap")]
    #[diagnostic(code(open_xmit::policy_violation))]
    PolicyViolation { size: usize, limit: usize },

    /// Filesystem error reading the input.
    #[error("cannot read {path}: {source}")]
    #[diagnostic(code(open_xmit::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    /// Whether this error aborts decoding (as opposed to being downgraded to
    /// an archive warning by the orchestrator).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ArchiveError::Truncated { .. }
                | ArchiveError::MalformedRecord { .. }
                | ArchiveError::PolicyViolation { .. }
                | ArchiveError::UnknownContainer
                | ArchiveError::UnsupportedUtility(_)
                | ArchiveError::Io { .. }
        )
    }
}

/// Result type for decoder operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
