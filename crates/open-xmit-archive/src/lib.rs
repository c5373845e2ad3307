//! Decoders for the legacy mainframe container formats carried by TSO
//! TRANSMIT and virtual tape tooling.
//!
//! Three interlocking formats are handled:
//!
//! - **NETDATA / XMI** — the `TRANSMIT`/`SENDFILE` wrapper carrying at most
//!   one dataset plus an optional message, framed as length-prefixed
//!   segments with `INMR01`..`INMR07` control records.
//! - **AWSTAPE / HET** — virtual tape images holding one or more labeled
//!   datasets; HET adds per-block ZLIB or BZIP2 compression.
//! - **IEBCOPY unload** — the partitioned-dataset serialization found inside
//!   either container whenever the enclosed dataset is a PDS: COPYR1/COPYR2
//!   control records, directory blocks, and TTR-keyed member data groups.
//!
//! Decoding is a single synchronous pass from input bytes to an [`Archive`]
//! tree of datasets, members, messages, and metadata. The decoder owns its
//! buffer and state exclusively; nothing is shared or mutated afterward.
//!
//! # Example
//!
//! ```no_run
//! use open_xmit_archive::{Archive, DecodeConfig};
//!
//! let archive = Archive::open_file("SAMPLE.XMI", &DecodeConfig::default())
//!     .map_err(|failure| failure.error)?;
//! for dataset in &archive.datasets {
//!     println!("{}", dataset.display_name());
//! }
//! # Ok::<(), open_xmit_archive::ArchiveError>(())
//! ```

pub mod archive;
pub mod classify;
pub mod config;
pub mod cursor;
pub mod error;
pub mod iebcopy;
pub mod json;
pub mod model;
pub mod netdata;
pub mod recfm;
pub mod tape;
pub mod textunit;

pub use archive::DecodeFailure;
pub use config::DecodeConfig;
pub use cursor::ByteCursor;
pub use error::{ArchiveError, Result};
pub use json::{dump_json, dump_json_string, JsonOptions};
pub use model::{
    Archive, ContainerKind, ContentKind, ControlRecordMeta, Dataset, DatasetOrg, IspfStats,
    Member, MetaValue, VolumeLabel,
};
pub use recfm::{RecordFormat, RecordKind};
pub use textunit::{TextUnit, TextUnitValue};
