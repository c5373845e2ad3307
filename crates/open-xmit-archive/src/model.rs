//! The decoded archive tree: datasets, members, messages, and metadata.
//!
//! Everything here is created during a single decode pass and never mutated
//! afterward. Byte streams are fully materialized; the decoder is a pure
//! function from input bytes to this model.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};

use crate::recfm::RecordFormat;

/// Which container the archive was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// NETDATA / TSO TRANSMIT.
    Xmi,
    /// Plain AWSTAPE virtual tape.
    Aws,
    /// Hercules Emulated Tape (AWS + per-block compression).
    Het,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Xmi => "XMI",
            ContainerKind::Aws => "AWS",
            ContainerKind::Het => "HET",
        }
    }
}

/// Dataset organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatasetOrg {
    /// Physical sequential — a single byte stream.
    #[default]
    Sequential,
    /// Partitioned — directory plus members.
    Partitioned,
    /// PDSE — enumerated like a PDS, extraction is best-effort.
    PartitionedExtended,
}

impl DatasetOrg {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetOrg::Sequential => "PS",
            DatasetOrg::Partitioned => "PO",
            DatasetOrg::PartitionedExtended => "PO-E",
        }
    }

    pub fn is_partitioned(&self) -> bool {
        !matches!(self, DatasetOrg::Sequential)
    }
}

/// A typed value inside a control-record metadata bag.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    Int(u64),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    Bool(bool),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            MetaValue::Int(n) => Some(*n),
            _ => None,
        }
    }
}

/// A control record preserved verbatim for observability: INMR01..INMR04,
/// COPYR1, COPYR2, and tape labels all land here.
#[derive(Debug, Clone, Default)]
pub struct ControlRecordMeta {
    /// Record name, e.g. "INMR01" or "COPYR1".
    pub name: String,
    /// Field name to typed value, ordered for stable dumps.
    pub fields: BTreeMap<String, MetaValue>,
}

impl ControlRecordMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: MetaValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetaValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(MetaValue::as_int)
    }
}

/// ISPF editor statistics from a member's 30-byte directory parms.
#[derive(Debug, Clone, PartialEq)]
pub struct IspfStats {
    /// "vv.mm", two BCD digits each.
    pub version: String,
    pub flags: u8,
    /// Day precision.
    pub created: Option<NaiveDate>,
    /// Microsecond precision (hundredths carried in the stats).
    pub modified: Option<NaiveDateTime>,
    /// Current line count.
    pub lines: u32,
    /// Lines added since creation.
    pub newlines: u32,
    /// Lines modified since creation.
    pub modlines: u32,
    /// Owning user ID.
    pub owner: String,
}

/// How a terminal byte stream was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentKind {
    #[default]
    Binary,
    Text,
}

/// A member of a partitioned dataset.
#[derive(Debug, Clone, Default)]
pub struct Member {
    /// Trimmed member name (8 EBCDIC characters, space-padded on disk).
    pub name: String,
    /// Opaque 3-byte locator ordering member data on the unload stream.
    pub ttr: u32,
    /// Alias bit from the directory entry.
    pub alias: bool,
    /// User-parameter length in bytes (the directory's halfword count × 2).
    pub halfwords: u16,
    /// Note-list count from the directory entry.
    pub notes: u8,
    /// Raw user parameters.
    pub parms: Vec<u8>,
    /// Decoded ISPF statistics, when the parms carry them.
    pub ispf: Option<IspfStats>,
    /// Concatenated member data after deblocking.
    pub data: Vec<u8>,
    /// Logical records of the member data.
    pub records: Vec<Vec<u8>>,
    /// Classification verdict.
    pub kind: ContentKind,
    /// UTF-8 conversion, present when classified text.
    pub text: Option<String>,
    /// Suggested file extension (".txt", ".jcl", ...).
    pub extension: Option<String>,
}

/// VOL1 label fields from a labeled tape.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeLabel {
    pub volser: String,
    pub owner: String,
}

/// One dataset reconstructed from the container.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// Dataset name. Absent for messages and for XMIT370-produced
    /// sequential files that carry no INMDSNAM.
    pub name: Option<String>,
    pub org: DatasetOrg,
    pub recfm: RecordFormat,
    pub lrecl: u32,
    pub blksize: u32,
    /// Total unloaded payload bytes for this dataset.
    pub unloaded_bytes: u64,
    /// Creation timestamp when the container recorded one.
    pub created: Option<NaiveDateTime>,
    /// Members, empty iff sequential. Directory order, which equals
    /// increasing TTR order.
    pub members: Vec<Member>,
    /// The reconstructed byte stream (sequential datasets).
    pub data: Vec<u8>,
    /// Logical records of the byte stream (sequential datasets).
    pub records: Vec<Vec<u8>>,
    /// Control-record bags: INMR02/INMR03 descriptors, COPYR1/COPYR2,
    /// HDR1/HDR2 as applicable.
    pub controls: Vec<ControlRecordMeta>,
    /// Classification verdict for sequential data.
    pub kind: ContentKind,
    /// UTF-8 conversion, present when classified text.
    pub text: Option<String>,
    /// Suggested file extension.
    pub extension: Option<String>,
    /// Findings to hoist onto the archive once the dataset is attached.
    pub(crate) pending_warnings: Vec<String>,
}

impl Dataset {
    /// The dataset name, or a placeholder for unnamed streams.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(unnamed)")
    }

    /// Find a control bag by record name.
    pub fn control(&self, name: &str) -> Option<&ControlRecordMeta> {
        self.controls.iter().find(|c| c.name == name)
    }

    /// Find a member by name.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Total bytes across members (partitioned) or the stream (sequential).
    pub fn total_bytes(&self) -> u64 {
        if self.org.is_partitioned() {
            self.members.iter().map(|m| m.data.len() as u64).sum()
        } else {
            self.data.len() as u64
        }
    }
}

/// The decoded archive: one per input file.
#[derive(Debug, Clone)]
pub struct Archive {
    pub kind: ContainerKind,
    /// Datasets in container order.
    pub datasets: Vec<Dataset>,
    /// The TRANSMIT message, stored as a sequential dataset without a name.
    pub message: Option<Dataset>,
    /// Source timestamp (INMR01 INMFTIME).
    pub timestamp: Option<NaiveDateTime>,
    pub origin_node: Option<String>,
    pub origin_user: Option<String>,
    pub target_node: Option<String>,
    pub target_user: Option<String>,
    /// VOL1 label of a labeled tape.
    pub volume: Option<VolumeLabel>,
    /// Archive-level control records (INMR01, INMR02[i], INMR03[i], INMR04).
    pub controls: Vec<ControlRecordMeta>,
    /// Non-fatal findings recorded during the decode.
    pub warnings: Vec<String>,
}

impl Archive {
    pub(crate) fn new(kind: ContainerKind) -> Self {
        Self {
            kind,
            datasets: Vec::new(),
            message: None,
            timestamp: None,
            origin_node: None,
            origin_user: None,
            target_node: None,
            target_user: None,
            volume: None,
            controls: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Find a dataset by name.
    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.name.as_deref() == Some(name))
    }

    /// Record a non-fatal finding.
    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.warnings.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_org_strings() {
        assert_eq!(DatasetOrg::Sequential.as_str(), "PS");
        assert_eq!(DatasetOrg::Partitioned.as_str(), "PO");
        assert_eq!(DatasetOrg::PartitionedExtended.as_str(), "PO-E");
        assert!(DatasetOrg::Partitioned.is_partitioned());
        assert!(!DatasetOrg::Sequential.is_partitioned());
    }

    #[test]
    fn test_control_meta_bag() {
        let mut meta = ControlRecordMeta::new("COPYR1");
        meta.set("DS1LRECL", MetaValue::Int(80));
        meta.set("type", MetaValue::Str("PDS".into()));
        assert_eq!(meta.get_int("DS1LRECL"), Some(80));
        assert_eq!(meta.get_str("type"), Some("PDS"));
        assert!(meta.get("DS1BLKL").is_none());
    }

    #[test]
    fn test_dataset_lookups() {
        let mut ds = Dataset {
            name: Some("A.B".into()),
            org: DatasetOrg::Partitioned,
            ..Dataset::default()
        };
        ds.members.push(Member {
            name: "ALPHA".into(),
            data: vec![0; 10],
            ..Member::default()
        });
        ds.members.push(Member {
            name: "BETA".into(),
            data: vec![0; 5],
            ..Member::default()
        });
        assert!(ds.member("ALPHA").is_some());
        assert!(ds.member("GAMMA").is_none());
        assert_eq!(ds.total_bytes(), 15);
    }
}
