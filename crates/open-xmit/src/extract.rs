//! Filesystem extraction of a decoded archive.
//!
//! Layout: each partitioned dataset becomes a directory with one file per
//! member; sequential datasets become plain files; the message, when
//! present, is written as `<first-dataset>.msg`. Suffixes come from the
//! classifier, and only text-classified streams get one by default.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use open_xmit_archive::{Archive, ContentKind, Dataset, Member};
use tracing::debug;

/// Extract every dataset, member, and message to `outputdir`.
pub fn extract_all(
    archive: &Archive,
    outputdir: &Path,
    quiet: bool,
    restore_dates: bool,
) -> io::Result<()> {
    fs::create_dir_all(outputdir)?;

    if let Some(message) = &archive.message {
        let stem = archive
            .datasets
            .first()
            .and_then(|d| d.name.clone())
            .unwrap_or_else(|| "MESSAGE".to_string());
        let target = outputdir.join(format!("{stem}.msg"));
        let text = message.text.clone().unwrap_or_default();
        fs::write(&target, text)?;
        if !quiet {
            println!("(message)\t->\t{}", target.display());
        }
    }

    for (index, dataset) in archive.datasets.iter().enumerate() {
        if dataset.org.is_partitioned() {
            extract_pds(dataset, outputdir, quiet, restore_dates)?;
        } else {
            let name = dataset
                .name
                .clone()
                .unwrap_or_else(|| format!("DATASET{:04}", index + 1));
            let target = outputdir.join(format!("{name}{}", suffix(dataset.kind, &dataset.extension)));
            write_stream(&target, dataset.kind, &dataset.text, &dataset.data)?;
            if !quiet {
                println!("{name}\t->\t{}", target.display());
            }
            if restore_dates {
                restore_mtime(&target, dataset.created.or(archive.timestamp))?;
            }
        }
    }
    Ok(())
}

fn extract_pds(
    dataset: &Dataset,
    outputdir: &Path,
    quiet: bool,
    restore_dates: bool,
) -> io::Result<()> {
    let dsname = dataset.name.clone().unwrap_or_else(|| "PDS".to_string());
    let folder = outputdir.join(&dsname);
    fs::create_dir_all(&folder)?;

    for member in &dataset.members {
        if member.alias {
            link_alias(dataset, member, &folder, quiet)?;
            continue;
        }
        let target = folder.join(format!(
            "{}{}",
            member.name,
            suffix(member.kind, &member.extension)
        ));
        write_stream(&target, member.kind, &member.text, &member.data)?;
        if !quiet {
            println!("{dsname}({})\t->\t{}", member.name, target.display());
        }
        if restore_dates {
            let stamp = member
                .ispf
                .as_ref()
                .and_then(|s| s.modified.or_else(|| s.created.and_then(|d| d.and_hms_opt(0, 0, 0))));
            restore_mtime(&target, stamp)?;
        }
    }
    Ok(())
}

/// Aliases become links to the member that owns the data.
fn link_alias(dataset: &Dataset, member: &Member, folder: &Path, quiet: bool) -> io::Result<()> {
    let Some(target) = dataset
        .members
        .iter()
        .find(|m| !m.alias && m.ttr == member.ttr)
    else {
        debug!(alias = %member.name, "alias has no primary member, skipped");
        return Ok(());
    };
    let target_name: PathBuf =
        format!("{}{}", target.name, suffix(target.kind, &target.extension)).into();
    let link = folder.join(format!(
        "{}{}",
        member.name,
        suffix(target.kind, &target.extension)
    ));
    if link.exists() || link.is_symlink() {
        fs::remove_file(&link)?;
    }
    if !quiet {
        println!(
            "{}({}) -> alias of {}",
            dataset.display_name(),
            member.name,
            target.name
        );
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&target_name, &link)
    }
    #[cfg(not(unix))]
    {
        fs::copy(folder.join(&target_name), &link).map(|_| ())
    }
}

/// Text-classified streams get their suffix; binary streams only keep a
/// recognized container suffix.
fn suffix(kind: ContentKind, extension: &Option<String>) -> String {
    match (kind, extension.as_deref()) {
        (ContentKind::Text, Some(ext)) => ext.to_string(),
        (ContentKind::Binary, Some(ext)) if ext != ".bin" => ext.to_string(),
        _ => String::new(),
    }
}

fn write_stream(
    target: &Path,
    kind: ContentKind,
    text: &Option<String>,
    data: &[u8],
) -> io::Result<()> {
    match (kind, text) {
        (ContentKind::Text, Some(text)) => fs::write(target, text),
        _ => fs::write(target, data),
    }
}

/// Set the file's mtime from decoded metadata.
fn restore_mtime(target: &Path, stamp: Option<NaiveDateTime>) -> io::Result<()> {
    let Some(stamp) = stamp else {
        return Ok(());
    };
    let Some(system_time) = to_system_time(&stamp) else {
        return Ok(());
    };
    let file = fs::File::options().write(true).open(target)?;
    file.set_times(fs::FileTimes::new().set_modified(system_time))
}

fn to_system_time(stamp: &NaiveDateTime) -> Option<std::time::SystemTime> {
    let seconds = stamp.and_utc().timestamp();
    if seconds < 0 {
        return None;
    }
    std::time::UNIX_EPOCH.checked_add(std::time::Duration::from_secs(seconds as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use open_xmit_archive::{DecodeConfig, JsonOptions};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("open-xmit-test-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    /// Build a tiny sequential XMI through the public decoder so the
    /// extraction path is exercised end to end.
    fn seq_archive() -> Archive {
        let cp = open_xmit_encoding::CodePage::by_name("cp037").unwrap();
        let ebcdic = |s: &str| cp.encode(s).unwrap();
        let unit = |key: u16, value: &[u8]| {
            let mut out = Vec::new();
            out.extend_from_slice(&key.to_be_bytes());
            out.extend_from_slice(&1u16.to_be_bytes());
            out.extend_from_slice(&(value.len() as u16).to_be_bytes());
            out.extend_from_slice(value);
            out
        };
        let control = |tag: &str, payload: &[u8]| {
            let mut body = ebcdic(tag);
            body.extend_from_slice(payload);
            let mut seg = vec![(body.len() + 2) as u8, 0x20];
            seg.extend_from_slice(&body);
            seg
        };

        let mut xmi = Vec::new();
        xmi.extend_from_slice(&control("INMR01", &unit(0x1012, &ebcdic("TESTUID"))));
        let mut inmr02 = vec![0, 0, 0, 1];
        inmr02.extend_from_slice(&unit(0x1028, &ebcdic("INMCOPY")));
        inmr02.extend_from_slice(&unit(0x0002, &ebcdic("EXTRACT")));
        inmr02.extend_from_slice(&unit(0x0049, &[0x90, 0x00]));
        inmr02.extend_from_slice(&unit(0x0042, &[0x00, 0x50]));
        xmi.extend_from_slice(&control("INMR02", &inmr02));
        xmi.extend_from_slice(&control("INMR03", &unit(0x0042, &[0x00, 0x50])));
        let mut line = ebcdic("EXTRACTED LINE");
        line.resize(80, 0x40);
        let mut seg = vec![(line.len() + 2) as u8, 0xC0];
        seg.extend_from_slice(&line);
        xmi.extend_from_slice(&seg);
        xmi.extend_from_slice(&control("INMR06", &[]));

        Archive::open_bytes(&xmi, &DecodeConfig::default()).unwrap()
    }

    #[test]
    fn test_extract_sequential_dataset() {
        let archive = seq_archive();
        let dir = temp_dir("seq");
        extract_all(&archive, &dir, true, false).unwrap();

        let target = dir.join("EXTRACT.txt");
        let contents = fs::read_to_string(&target).unwrap();
        assert_eq!(contents, "EXTRACTED LINE\n");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_json_dump_matches_archive() {
        let archive = seq_archive();
        let value = open_xmit_archive::dump_json(&archive, JsonOptions { text: true });
        assert_eq!(
            value["file"]["EXTRACT"]["contents"].as_str().unwrap(),
            "EXTRACTED LINE\n"
        );
    }
}
