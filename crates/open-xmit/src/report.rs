//! Plain-text contents listing.

use open_xmit_archive::{Archive, Dataset, Member};

/// Print a column-aligned table of every dataset and member.
pub fn print_listing(archive: &Archive, human: bool) {
    let mut rows: Vec<[String; 6]> = Vec::new();
    for dataset in &archive.datasets {
        rows.push(dataset_row(dataset, human));
        for member in &dataset.members {
            rows.push(member_row(dataset, member, human));
        }
    }
    if let Some(message) = &archive.message {
        let mut row = dataset_row(message, human);
        row[0] = "(message)".to_string();
        rows.push(row);
    }

    let header = ["FILENAME", "MEMBER", "SIZE", "RECFM", "LRECL", "MODIFIED"];
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let print_row = |cells: &[String]| {
        let line: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect();
        println!("{}", line.join("  ").trim_end());
    };

    print_row(&header.map(String::from));
    for row in &rows {
        print_row(row);
    }

    if let Some(volume) = &archive.volume {
        println!();
        println!("volume {} owner {}", volume.volser, volume.owner);
    }
}

fn dataset_row(dataset: &Dataset, human: bool) -> [String; 6] {
    [
        dataset.display_name().to_string(),
        String::new(),
        size_cell(dataset.total_bytes(), human),
        dataset.recfm.to_string(),
        dataset.lrecl.to_string(),
        dataset
            .created
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
    ]
}

fn member_row(dataset: &Dataset, member: &Member, human: bool) -> [String; 6] {
    let modified = member
        .ispf
        .as_ref()
        .and_then(|s| s.modified)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    [
        dataset.display_name().to_string(),
        if member.alias {
            format!("{} (alias)", member.name)
        } else {
            member.name.clone()
        },
        size_cell(member.data.len() as u64, human),
        String::new(),
        String::new(),
        modified,
    ]
}

fn size_cell(size: u64, human: bool) -> String {
    if human {
        human_size(size)
    } else {
        size.to_string()
    }
}

/// Human-friendly size, `1.5K` style.
pub fn human_size(size: u64) -> String {
    const UNITS: [&str; 7] = ["", "K", "M", "G", "T", "P", "E"];
    let mut value = size as f64;
    for unit in UNITS {
        if value < 1024.0 {
            let rendered = if unit.is_empty() {
                format!("{size}")
            } else {
                format!("{value:.1}{unit}")
            };
            return rendered;
        }
        value /= 1024.0;
    }
    format!("{value:.1}Z")
}
