//! Container detection and the decode orchestrator.
//!
//! The orchestrator sniffs the container kind, runs the matching framer,
//! peels the IEBCOPY layer out of partitioned payloads, recursively decodes
//! XMI-in-XMI nesting, and classifies every terminal byte stream. The
//! result is one immutable [`Archive`] per input.

use std::path::Path;

use tracing::debug;

use crate::classify;
use crate::config::DecodeConfig;
use crate::error::ArchiveError;
use crate::iebcopy;
use crate::model::{
    Archive, ContainerKind, ControlRecordMeta, Dataset, DatasetOrg, Member, MetaValue,
};
use crate::netdata;
use crate::recfm::{self, RecordFormat, RecordKind};
use crate::tape;
use open_xmit_encoding::CodePage;

/// A failed decode, carrying whatever was populated before the error.
#[derive(Debug)]
pub struct DecodeFailure {
    pub error: ArchiveError,
    /// Partial archive when decoding got far enough to produce one.
    pub partial: Option<Archive>,
}

impl DecodeFailure {
    fn bare(error: ArchiveError) -> Box<Self> {
        Box::new(Self {
            error,
            partial: None,
        })
    }
}

impl std::fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for DecodeFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

type DecodeResult = std::result::Result<Archive, Box<DecodeFailure>>;

impl Archive {
    /// Decode an XMI/AWS/HET file from disk.
    pub fn open_file(path: impl AsRef<Path>, config: &DecodeConfig) -> DecodeResult {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| {
            DecodeFailure::bare(ArchiveError::Io {
                path: path.display().to_string(),
                source,
            })
        })?;
        Self::open_bytes(&data, config)
    }

    /// Decode an XMI/AWS/HET image already in memory.
    pub fn open_bytes(data: &[u8], config: &DecodeConfig) -> DecodeResult {
        let codec = CodePage::by_name(&config.encoding)
            .map_err(|e| DecodeFailure::bare(ArchiveError::Decoding(e)))?;
        decode_container(data, config, codec, 0)
    }
}

/// Sniff the container kind from the first bytes.
pub(crate) fn sniff(data: &[u8], codec: &CodePage) -> Option<ContainerKind> {
    if looks_like_xmi(data, codec) {
        return Some(ContainerKind::Xmi);
    }
    if data.len() >= 6 {
        let flags = data[4];
        if flags & 0x80 != 0 {
            return match flags & 0x03 {
                0 => Some(ContainerKind::Aws),
                _ => Some(ContainerKind::Het),
            };
        }
    }
    None
}

/// The INMR01 eye-catcher sits at offset 2 behind the first segment's
/// length/flag halfword; tolerate it at offset 0 as well.
pub(crate) fn looks_like_xmi(data: &[u8], codec: &CodePage) -> bool {
    (data.len() >= 6 && codec.decode(&data[0..6]) == "INMR01")
        || (data.len() >= 8 && codec.decode(&data[2..8]) == "INMR01")
}

fn decode_container(
    data: &[u8],
    config: &DecodeConfig,
    codec: &'static CodePage,
    depth: usize,
) -> DecodeResult {
    match sniff(data, codec) {
        Some(ContainerKind::Xmi) => decode_xmi(data, config, codec, depth),
        Some(kind) => decode_tape(data, kind, config, codec, depth),
        None => Err(DecodeFailure::bare(ArchiveError::UnknownContainer)),
    }
}

// ───────────────────────────── XMI ─────────────────────────────

fn decode_xmi(
    data: &[u8],
    config: &DecodeConfig,
    codec: &'static CodePage,
    depth: usize,
) -> DecodeResult {
    let scan = netdata::scan(data, config, codec).map_err(DecodeFailure::bare)?;

    let mut archive = Archive::new(ContainerKind::Xmi);
    archive.timestamp = scan.header.timestamp;
    archive.origin_node = scan.header.origin_node.clone();
    archive.origin_user = scan.header.origin_user.clone();
    archive.target_node = scan.header.target_node.clone();
    archive.target_user = scan.header.target_user.clone();
    archive.controls = scan.controls;
    for warning in scan.warnings {
        archive.warn(warning);
    }

    let files = netdata::group_descriptors(&scan.descriptors);
    if files.len() != scan.streams.len() {
        archive.warn(format!(
            "{} file descriptors but {} data streams",
            files.len(),
            scan.streams.len()
        ));
    }

    for (index, file) in files.iter().enumerate() {
        let descriptor = &scan.descriptors[file.primary];
        let records = scan.streams.get(index).cloned().unwrap_or_default();
        let stream_lrecl = scan.formats.get(index).and_then(|f| f.lrecl);

        let mut dataset = Dataset {
            name: descriptor.dsname.clone(),
            org: if descriptor.utility == "IEBCOPY" {
                DatasetOrg::Partitioned
            } else {
                descriptor.org.unwrap_or_default()
            },
            recfm: descriptor.recfm.unwrap_or_default(),
            lrecl: descriptor
                .lrecl
                .or(stream_lrecl)
                .unwrap_or(config.fallback_lrecl),
            blksize: descriptor.blksize.unwrap_or(0),
            created: descriptor.created,
            ..Dataset::default()
        };
        dataset.data = records.concat();
        dataset.records = records;
        dataset.unloaded_bytes = dataset.data.len() as u64;

        if let Some(size) = descriptor.size {
            if size != dataset.unloaded_bytes {
                archive.warn(format!(
                    "{}: INMSIZE {size} does not match {} unloaded bytes",
                    dataset.display_name(),
                    dataset.unloaded_bytes
                ));
            }
        }

        if file.is_message {
            dataset.name = None;
            dataset.org = DatasetOrg::Sequential;
            if let Some(lrecl) = stream_lrecl {
                dataset.lrecl = lrecl;
            }
            finish_sequential(&mut dataset, codec, config);
            if archive.message.is_some() {
                archive.warn("more than one message stream; keeping the first".to_string());
            } else {
                archive.message = Some(dataset);
            }
            continue;
        }

        if dataset.org.is_partitioned() {
            match attach_pds(&mut dataset, codec, config) {
                Ok(()) => {}
                Err(failure) => {
                    archive.datasets.push(dataset);
                    return Err(Box::new(DecodeFailure {
                        error: failure.error,
                        partial: Some(archive),
                    }));
                }
            }
            for warning in dataset.take_warnings() {
                archive.warn(warning);
            }
            if !dataset.org.is_partitioned() {
                // Downgraded: the payload was not an IEBCOPY unload.
                finish_sequential(&mut dataset, codec, config);
            }
            archive.datasets.push(dataset);
            continue;
        }

        // Sequential: maybe a nested XMI.
        if looks_like_xmi(&dataset.data, codec) {
            match recurse_nested(&dataset, config, codec, depth, &mut archive) {
                NestedOutcome::Spliced => continue,
                NestedOutcome::Kept => {}
            }
        }
        finish_sequential(&mut dataset, codec, config);
        archive.datasets.push(dataset);
    }

    if let Some(expected) = scan.header.num_files {
        let got = archive.datasets.len() as u64;
        if expected != got {
            archive.warn(format!(
                "INMNUMF says {expected} files, decoded {got} datasets"
            ));
        }
    }
    debug!(
        datasets = archive.datasets.len(),
        message = archive.message.is_some(),
        "XMI decoded"
    );
    Ok(archive)
}

enum NestedOutcome {
    /// The nested archive's datasets were spliced into the parent.
    Spliced,
    /// The payload stays as an ordinary sequential dataset.
    Kept,
}

fn recurse_nested(
    dataset: &Dataset,
    config: &DecodeConfig,
    codec: &'static CodePage,
    depth: usize,
    archive: &mut Archive,
) -> NestedOutcome {
    if depth + 1 >= config.max_nested {
        archive.warn(format!(
            "{}: nested XMI beyond depth {} left unexpanded",
            dataset.display_name(),
            config.max_nested
        ));
        return NestedOutcome::Kept;
    }
    debug!(name = dataset.display_name(), depth, "descending into nested XMI");
    match decode_container(&dataset.data, config, codec, depth + 1) {
        Ok(nested) => {
            for warning in nested.warnings {
                archive.warn(warning);
            }
            archive.datasets.extend(nested.datasets);
            if archive.message.is_none() {
                archive.message = nested.message;
            }
            NestedOutcome::Spliced
        }
        Err(failure) => {
            archive.warn(format!(
                "{}: nested XMI failed to decode ({}); kept as data",
                dataset.display_name(),
                failure.error
            ));
            NestedOutcome::Kept
        }
    }
}

// ───────────────────────────── Tape ─────────────────────────────

fn decode_tape(
    data: &[u8],
    kind: ContainerKind,
    config: &DecodeConfig,
    codec: &'static CodePage,
    depth: usize,
) -> DecodeResult {
    let het = kind == ContainerKind::Het;
    let scan = tape::scan(data, het, config, codec).map_err(DecodeFailure::bare)?;

    let mut archive = Archive::new(kind);
    archive.volume = scan.volume;
    for warning in scan.warnings {
        archive.warn(warning);
    }

    for file in scan.files {
        let mut dataset = Dataset {
            name: Some(file.name.clone()),
            org: DatasetOrg::Sequential,
            recfm: file.recfm,
            lrecl: file.lrecl,
            blksize: file.blksize,
            created: file.created,
            ..Dataset::default()
        };
        if let Some(hdr1) = file.hdr1 {
            dataset.controls.push(hdr1);
        }
        if let Some(hdr2) = file.hdr2 {
            dataset.controls.push(hdr2);
        }
        if !file.user_labels.is_empty() {
            let mut meta = ControlRecordMeta::new("UHL");
            for (i, label) in file.user_labels.iter().enumerate() {
                meta.set(format!("{}", i + 1), MetaValue::Str(label.clone()));
            }
            dataset.controls.push(meta);
        }
        dataset.data = file.records.concat();
        dataset.unloaded_bytes = dataset.data.len() as u64;

        // A PDS on tape is an IEBCOPY unload in (typically) VBS framing.
        if file
            .records
            .first()
            .map(|r| iebcopy::looks_like_iebcopy(r))
            .unwrap_or(false)
        {
            let unload_format = RecordFormat {
                kind: RecordKind::Variable,
                blocked: true,
                spanned: true,
                ..RecordFormat::default()
            };
            match recfm::deblock(unload_format, 0, &file.records) {
                Ok(unload_records) => {
                    dataset.records = unload_records;
                    match attach_pds(&mut dataset, codec, config) {
                        Ok(()) => {}
                        Err(failure) => {
                            archive.datasets.push(dataset);
                            return Err(Box::new(DecodeFailure {
                                error: failure.error,
                                partial: Some(archive),
                            }));
                        }
                    }
                    for warning in dataset.take_warnings() {
                        archive.warn(warning);
                    }
                    archive.datasets.push(dataset);
                    continue;
                }
                Err(e) => {
                    archive.warn(format!(
                        "{}: IEBCOPY eye-catcher present but unload framing is broken ({e})",
                        file.name
                    ));
                }
            }
        }

        dataset.records = file.records;

        if looks_like_xmi(&dataset.data, codec) {
            match recurse_nested(&dataset, config, codec, depth, &mut archive) {
                NestedOutcome::Spliced => continue,
                NestedOutcome::Kept => {}
            }
        }
        finish_sequential(&mut dataset, codec, config);
        archive.datasets.push(dataset);
    }

    debug!(datasets = archive.datasets.len(), "tape decoded");
    Ok(archive)
}

// ───────────────────────────── Shared ─────────────────────────────

impl Dataset {
    /// Drain warnings stashed on the dataset during IEBCOPY decoding.
    fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_warnings)
    }
}

/// Decode the IEBCOPY layer of a partitioned dataset in place.
fn attach_pds(
    dataset: &mut Dataset,
    codec: &'static CodePage,
    config: &DecodeConfig,
) -> std::result::Result<(), Box<iebcopy::PdsFailure>> {
    // Payloads that claim PO but carry no unload are downgraded, the way
    // sequential XMIT370 payloads sometimes mislabel themselves.
    if !dataset
        .records
        .first()
        .map(|r| iebcopy::looks_like_iebcopy(r))
        .unwrap_or(false)
    {
        dataset.pending_warnings.push(format!(
            "{}: descriptor says {} but the payload is not an IEBCOPY unload",
            dataset.display_name(),
            dataset.org.as_str()
        ));
        dataset.org = DatasetOrg::Sequential;
        return Ok(());
    }

    let decoded = iebcopy::decode(&dataset.records, codec, config);
    let output = match decoded {
        Ok(output) => output,
        Err(failure) => {
            apply_pds_output(dataset, &failure.partial, codec, config);
            return Err(failure);
        }
    };
    apply_pds_output(dataset, &output, codec, config);
    Ok(())
}

fn apply_pds_output(
    dataset: &mut Dataset,
    output: &iebcopy::PdsOutput,
    codec: &CodePage,
    config: &DecodeConfig,
) {
    dataset.org = output.org;
    if output.copyr1.is_some() {
        dataset.recfm = output.recfm;
        dataset.lrecl = output.lrecl;
        dataset.blksize = output.blksize;
    }
    if let Some(copyr1) = &output.copyr1 {
        dataset.controls.push(copyr1.clone());
    }
    if let Some(copyr2) = &output.copyr2 {
        dataset.controls.push(copyr2.clone());
    }
    dataset.members = output.members.clone();
    dataset
        .pending_warnings
        .extend(output.warnings.iter().cloned());

    for member in &mut dataset.members {
        if member.alias {
            continue;
        }
        classify_member(member, dataset.recfm, dataset.lrecl, codec, config);
    }
}

fn classify_member(
    member: &mut Member,
    recfm: RecordFormat,
    lrecl: u32,
    codec: &CodePage,
    config: &DecodeConfig,
) {
    let result = classify::classify(&member.records, &member.data, recfm, lrecl, codec, config);
    member.kind = result.kind;
    member.text = result.text;
    member.extension = Some(result.extension);
}

fn finish_sequential(dataset: &mut Dataset, codec: &CodePage, config: &DecodeConfig) {
    let result = classify::classify(
        &dataset.records,
        &dataset.data,
        dataset.recfm,
        dataset.lrecl,
        codec,
        config,
    );
    dataset.kind = result.kind;
    dataset.text = result.text;
    dataset.extension = Some(result.extension);
}

#[cfg(test)]
mod tests {
    use super::*;
    use open_xmit_encoding::CP037;

    #[test]
    fn test_sniff_xmi() {
        let mut data = vec![0x54, 0x20];
        data.extend_from_slice(&CP037.encode("INMR01").unwrap());
        assert_eq!(sniff(&data, &CP037), Some(ContainerKind::Xmi));
        let mut at_zero = CP037.encode("INMR01").unwrap();
        at_zero.extend_from_slice(&[0x00, 0x00]);
        assert_eq!(sniff(&at_zero, &CP037), Some(ContainerKind::Xmi));
    }

    #[test]
    fn test_sniff_tape_kinds() {
        // 6-byte header, NEWREC flag, no compression.
        let aws = [0x50, 0x00, 0x00, 0x00, 0xA0, 0x00];
        assert_eq!(sniff(&aws, &CP037), Some(ContainerKind::Aws));
        let het_zlib = [0x50, 0x00, 0x00, 0x00, 0xA1, 0x00];
        assert_eq!(sniff(&het_zlib, &CP037), Some(ContainerKind::Het));
        let het_bzip2 = [0x50, 0x00, 0x00, 0x00, 0xA2, 0x00];
        assert_eq!(sniff(&het_bzip2, &CP037), Some(ContainerKind::Het));
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(sniff(b"MZ\x90\x00\x03\x00", &CP037), None);
        assert_eq!(sniff(&[], &CP037), None);
    }

    #[test]
    fn test_unknown_container_error() {
        let failure =
            Archive::open_bytes(b"not a mainframe file", &DecodeConfig::default()).unwrap_err();
        assert!(matches!(failure.error, ArchiveError::UnknownContainer));
        assert!(failure.partial.is_none());
    }

    #[test]
    fn test_unknown_encoding_fails() {
        let config = DecodeConfig::default().with_encoding("latin-9");
        let failure = Archive::open_bytes(&[0u8; 16], &config).unwrap_err();
        assert!(matches!(failure.error, ArchiveError::Decoding(_)));
    }
}
