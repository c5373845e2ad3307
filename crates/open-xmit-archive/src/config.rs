//! Decoder configuration.

/// Immutable configuration passed by value to the decode entry points.
///
/// There is no module-level state: each decode owns one `DecodeConfig`.
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Record length to assume when no LRECL is recoverable from metadata
    /// (unlabeled tapes, RECFM=U streams).
    pub fallback_lrecl: u32,
    /// EBCDIC code page used for all text translation.
    pub encoding: String,
    /// Strip the rightmost 8-column sequence number from fixed-80 text.
    pub unnum: bool,
    /// Classify every stream as text regardless of content.
    pub force_text: bool,
    /// Classify every stream as binary regardless of content.
    pub binary_only: bool,
    /// Restore ISPF modified/created dates onto extracted files.
    pub preserve_modify_date: bool,
    /// Refuse to materialize any single record larger than this.
    pub max_record_bytes: usize,
    /// Maximum depth for XMI-in-XMI recursion.
    pub max_nested: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            fallback_lrecl: 80,
            encoding: "cp1140".to_string(),
            unnum: true,
            force_text: false,
            binary_only: false,
            preserve_modify_date: false,
            max_record_bytes: 64 * 1024 * 1024,
            max_nested: 8,
        }
    }
}

impl DecodeConfig {
    /// Set the fallback record length.
    pub fn with_fallback_lrecl(mut self, lrecl: u32) -> Self {
        self.fallback_lrecl = lrecl;
        self
    }

    /// Set the EBCDIC code page by name.
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// Enable or disable sequence-number stripping.
    pub fn with_unnum(mut self, unnum: bool) -> Self {
        self.unnum = unnum;
        self
    }

    /// Force text classification for every stream.
    pub fn with_force_text(mut self, force: bool) -> Self {
        self.force_text = force;
        self
    }

    /// Force binary classification for every stream.
    pub fn with_binary_only(mut self, binary: bool) -> Self {
        self.binary_only = binary;
        self
    }

    /// Restore metadata dates onto extracted files.
    pub fn with_preserve_modify_date(mut self, preserve: bool) -> Self {
        self.preserve_modify_date = preserve;
        self
    }

    /// Cap the size of a single materialized record.
    pub fn with_max_record_bytes(mut self, cap: usize) -> Self {
        self.max_record_bytes = cap;
        self
    }

    /// Cap nested-container recursion.
    pub fn with_max_nested(mut self, depth: usize) -> Self {
        self.max_nested = depth;
        self
    }
}
