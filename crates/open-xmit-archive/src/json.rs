//! JSON projection of a decoded archive.
//!
//! The layout mirrors the metadata dumps of the classic unload tooling:
//! XMI archives get one object per INMR01/INMR02[/i]/INMR03[/i] control
//! record plus a `file` map; tape archives get a `label` object and the
//! `file` map. Partitioned datasets expose COPYR1/COPYR2 (extents as
//! hex-escaped 16-byte strings) and a `members` map. All dates render as
//! ISO-8601 with microseconds.

use serde_json::{json, Map, Value};

use crate::model::{
    Archive, ContainerKind, ControlRecordMeta, Dataset, ContentKind, Member, MetaValue,
};

/// Projection options.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonOptions {
    /// Include the UTF-8 contents of text-classified streams.
    pub text: bool,
}

/// Render the archive as a JSON value with canonically ordered keys.
pub fn dump_json(archive: &Archive, options: JsonOptions) -> Value {
    let mut root = Map::new();

    match archive.kind {
        ContainerKind::Xmi => {
            let mut inmr02 = Map::new();
            let mut inmr03 = Map::new();
            for control in &archive.controls {
                match control.name.split_once('/') {
                    Some(("INMR02", index)) => {
                        inmr02.insert(index.to_string(), meta_to_value(control));
                    }
                    Some(("INMR03", index)) => {
                        inmr03.insert(index.to_string(), meta_to_value(control));
                    }
                    _ => {
                        root.insert(control.name.clone(), meta_to_value(control));
                    }
                }
            }
            if !inmr02.is_empty() {
                root.insert("INMR02".to_string(), Value::Object(inmr02));
            }
            if !inmr03.is_empty() {
                root.insert("INMR03".to_string(), Value::Object(inmr03));
            }
        }
        ContainerKind::Aws | ContainerKind::Het => {
            if let Some(volume) = &archive.volume {
                root.insert(
                    "label".to_string(),
                    json!({ "volser": volume.volser, "owner": volume.owner }),
                );
            }
        }
    }

    let mut files = Map::new();
    for (index, dataset) in archive.datasets.iter().enumerate() {
        let key = dataset
            .name
            .clone()
            .unwrap_or_else(|| format!("DATASET{:04}", index + 1));
        files.insert(key, dataset_to_value(dataset, options));
    }
    root.insert("file".to_string(), Value::Object(files));

    if let Some(message) = &archive.message {
        let mut entry = Map::new();
        entry.insert("lrecl".to_string(), json!(message.lrecl));
        if options.text {
            if let Some(text) = &message.text {
                entry.insert("text".to_string(), json!(text));
            }
        }
        root.insert("message".to_string(), Value::Object(entry));
    }

    Value::Object(root)
}

/// Render the archive as pretty-printed JSON text.
pub fn dump_json_string(archive: &Archive, options: JsonOptions) -> String {
    let value = dump_json(archive, options);
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

fn dataset_to_value(dataset: &Dataset, options: JsonOptions) -> Value {
    let mut entry = Map::new();
    entry.insert("dsorg".to_string(), json!(dataset.org.as_str()));
    entry.insert("recfm".to_string(), json!(dataset.recfm.to_string()));
    entry.insert("lrecl".to_string(), json!(dataset.lrecl));
    entry.insert("blksize".to_string(), json!(dataset.blksize));
    entry.insert("size".to_string(), json!(dataset.total_bytes()));
    if let Some(created) = &dataset.created {
        entry.insert("created".to_string(), json!(iso_micros(created)));
    }
    for control in &dataset.controls {
        entry.insert(control.name.clone(), meta_to_value(control));
    }

    if dataset.org.is_partitioned() {
        let mut members = Map::new();
        for member in &dataset.members {
            members.insert(member.name.clone(), member_to_value(member, options));
        }
        entry.insert("members".to_string(), Value::Object(members));
    } else {
        entry.insert(
            "datatype".to_string(),
            json!(match dataset.kind {
                ContentKind::Text => "text",
                ContentKind::Binary => "binary",
            }),
        );
        if let Some(extension) = &dataset.extension {
            entry.insert("extension".to_string(), json!(extension));
        }
        if options.text {
            if let Some(text) = &dataset.text {
                entry.insert("contents".to_string(), json!(text));
            }
        }
    }
    Value::Object(entry)
}

fn member_to_value(member: &Member, options: JsonOptions) -> Value {
    let mut entry = Map::new();
    entry.insert("ttr".to_string(), json!(member.ttr));
    entry.insert("alias".to_string(), json!(member.alias));
    entry.insert("halfwords".to_string(), json!(member.halfwords));
    entry.insert("notes".to_string(), json!(member.notes));
    entry.insert("parms".to_string(), json!(hex_string(&member.parms)));
    entry.insert(
        "ispf".to_string(),
        match &member.ispf {
            Some(stats) => {
                let mut ispf = Map::new();
                ispf.insert("version".to_string(), json!(stats.version));
                ispf.insert("flags".to_string(), json!(stats.flags));
                if let Some(created) = &stats.created {
                    ispf.insert(
                        "createdate".to_string(),
                        json!(iso_micros(&created.and_time(chrono::NaiveTime::MIN))),
                    );
                }
                if let Some(modified) = &stats.modified {
                    ispf.insert("modifydate".to_string(), json!(iso_micros(modified)));
                }
                ispf.insert("lines".to_string(), json!(stats.lines));
                ispf.insert("newlines".to_string(), json!(stats.newlines));
                ispf.insert("modlines".to_string(), json!(stats.modlines));
                ispf.insert("user".to_string(), json!(stats.owner));
                Value::Object(ispf)
            }
            None => Value::Bool(false),
        },
    );
    entry.insert("size".to_string(), json!(member.data.len()));
    if let Some(extension) = &member.extension {
        entry.insert("extension".to_string(), json!(extension));
    }
    if options.text {
        if let Some(text) = &member.text {
            entry.insert("contents".to_string(), json!(text));
        }
    }
    Value::Object(entry)
}

fn meta_to_value(meta: &ControlRecordMeta) -> Value {
    let mut entry = Map::new();
    for (key, value) in &meta.fields {
        let rendered = match value {
            MetaValue::Str(s) => json!(s),
            MetaValue::Int(n) => json!(n),
            MetaValue::Bool(b) => json!(b),
            MetaValue::Timestamp(t) => json!(iso_micros(t)),
            MetaValue::Bytes(b) if meta.name == "COPYR2" && key == "extents" => {
                Value::Array(b.chunks(16).map(|chunk| json!(hex_string(chunk))).collect())
            }
            MetaValue::Bytes(b) => json!(hex_string(b)),
        };
        entry.insert(key.clone(), rendered);
    }
    Value::Object(entry)
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn iso_micros(ts: &chrono::NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatasetOrg, IspfStats, MetaValue, VolumeLabel};
    use chrono::NaiveDate;

    fn sample_archive() -> Archive {
        let mut archive = Archive::new(ContainerKind::Xmi);
        let mut inmr01 = ControlRecordMeta::new("INMR01");
        inmr01.set("INMFNODE", MetaValue::Str("ORIGNODE".into()));
        inmr01.set(
            "INMFTIME",
            MetaValue::Timestamp(
                NaiveDate::from_ymd_opt(2021, 3, 9)
                    .unwrap()
                    .and_hms_opt(4, 53, 18)
                    .unwrap(),
            ),
        );
        archive.controls.push(inmr01);
        let mut inmr02 = ControlRecordMeta::new("INMR02/1");
        inmr02.set("INMUTILN", MetaValue::Str("INMCOPY".into()));
        archive.controls.push(inmr02);

        let mut dataset = Dataset {
            name: Some("PYTHON.XMI.PDS".into()),
            org: DatasetOrg::Partitioned,
            lrecl: 80,
            blksize: 3200,
            ..Dataset::default()
        };
        let mut copyr2 = ControlRecordMeta::new("COPYR2");
        copyr2.set("deb", MetaValue::Bytes(vec![0x10; 16]));
        copyr2.set("extents", MetaValue::Bytes(vec![0xAB; 32]));
        dataset.controls.push(copyr2);
        dataset.members.push(Member {
            name: "TESTING".into(),
            ttr: 0x102,
            halfwords: 30,
            parms: vec![0x01, 0x00],
            ispf: Some(IspfStats {
                version: "01.00".into(),
                flags: 0,
                created: NaiveDate::from_ymd_opt(2021, 3, 8),
                modified: NaiveDate::from_ymd_opt(2021, 3, 8)
                    .unwrap()
                    .and_hms_opt(22, 53, 29),
                lines: 10,
                newlines: 2,
                modlines: 1,
                owner: "PHIL".into(),
            }),
            data: vec![0xC1; 80],
            text: Some("SOME TEXT\n".into()),
            extension: Some(".txt".into()),
            ..Member::default()
        });
        dataset.members.push(Member {
            name: "Z15IMG".into(),
            ttr: 0x205,
            data: vec![0x00; 64],
            ..Member::default()
        });
        archive.datasets.push(dataset);
        archive
    }

    #[test]
    fn test_xmi_dump_shape() {
        let archive = sample_archive();
        let value = dump_json(&archive, JsonOptions::default());
        assert_eq!(value["INMR01"]["INMFNODE"], "ORIGNODE");
        assert_eq!(value["INMR01"]["INMFTIME"], "2021-03-09T04:53:18.000000");
        assert_eq!(value["INMR02"]["1"]["INMUTILN"], "INMCOPY");

        let pds = &value["file"]["PYTHON.XMI.PDS"];
        assert_eq!(pds["dsorg"], "PO");
        let testing = &pds["members"]["TESTING"];
        assert_eq!(testing["ispf"]["version"], "01.00");
        assert_eq!(testing["ispf"]["user"], "PHIL");
        assert_eq!(testing["ispf"]["modifydate"], "2021-03-08T22:53:29.000000");
        assert_eq!(pds["members"]["Z15IMG"]["ispf"], Value::Bool(false));
        // Text only appears when requested.
        assert!(testing.get("contents").is_none());
    }

    #[test]
    fn test_extents_are_hex_chunks() {
        let archive = sample_archive();
        let value = dump_json(&archive, JsonOptions::default());
        let extents = value["file"]["PYTHON.XMI.PDS"]["COPYR2"]["extents"]
            .as_array()
            .unwrap();
        assert_eq!(extents.len(), 2);
        assert_eq!(extents[0], "ab".repeat(16));
        assert_eq!(
            value["file"]["PYTHON.XMI.PDS"]["COPYR2"]["deb"],
            "10".repeat(16)
        );
    }

    #[test]
    fn test_text_option_includes_contents() {
        let archive = sample_archive();
        let value = dump_json(&archive, JsonOptions { text: true });
        assert_eq!(
            value["file"]["PYTHON.XMI.PDS"]["members"]["TESTING"]["contents"],
            "SOME TEXT\n"
        );
    }

    #[test]
    fn test_tape_dump_has_label() {
        let mut archive = Archive::new(ContainerKind::Aws);
        archive.volume = Some(VolumeLabel {
            volser: "XMILIB".into(),
            owner: "OPENXMIT".into(),
        });
        archive.datasets.push(Dataset {
            name: Some("PYTHON.XMI.SEQ".into()),
            org: DatasetOrg::Sequential,
            ..Dataset::default()
        });
        let value = dump_json(&archive, JsonOptions::default());
        assert_eq!(value["label"]["volser"], "XMILIB");
        assert_eq!(value["file"]["PYTHON.XMI.SEQ"]["dsorg"], "PS");
    }

    #[test]
    fn test_dump_is_stable() {
        let archive = sample_archive();
        let a = dump_json_string(&archive, JsonOptions::default());
        let b = dump_json_string(&archive, JsonOptions::default());
        assert_eq!(a, b);
    }
}
