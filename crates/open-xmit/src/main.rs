//! CLI for unloading XMI, AWS, and HET mainframe container files.
//!
//! # Examples
//!
//! ```bash
//! # Extract every dataset and member to the current directory
//! open-xmit FILE100.XMI
//!
//! # List the contents without writing anything
//! open-xmit -p -H tapefile01.het
//!
//! # Dump all metadata as JSON
//! open-xmit -j --jsonfile meta.json FILE100.XMI
//! ```

use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, Result, WrapErr};
use open_xmit_archive::{Archive, DecodeConfig, JsonOptions};

mod extract;
mod report;

#[derive(Parser, Debug)]
#[command(name = "open-xmit")]
#[command(author, version, about = "XMI/AWS/HET mainframe file unload utility", long_about = None)]
struct Cli {
    /// XMI, AWS, or HET input file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Keep the sequence-number columns in converted text
    #[arg(short = 'u', long = "unnum", action = clap::ArgAction::SetFalse)]
    unnum: bool,

    /// Convert every file to text regardless of content
    #[arg(short, long)]
    force: bool,

    /// Extract every file as binary, never converting
    #[arg(short, long)]
    binary: bool,

    /// Only print warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Print sizes in human-readable units
    #[arg(short = 'H', long)]
    human: bool,

    /// Write archive metadata to a JSON file
    #[arg(short, long)]
    json: bool,

    /// Path for the JSON metadata file (implies --json)
    #[arg(long, value_name = "PATH")]
    jsonfile: Option<PathBuf>,

    /// Directory to extract into
    #[arg(long, value_name = "PATH", default_value = ".")]
    outputdir: PathBuf,

    /// EBCDIC code page for text conversion
    #[arg(long, value_name = "NAME", default_value = "cp1140")]
    encoding: String,

    /// Record length to assume when none is recoverable
    #[arg(long, value_name = "N", default_value_t = 80)]
    lrecl: u32,

    /// Set extracted files' modification time from ISPF statistics
    #[arg(short, long)]
    modify: bool,

    /// Print the contents listing instead of extracting
    #[arg(short, long)]
    print: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = DecodeConfig::default()
        .with_encoding(&cli.encoding)
        .with_unnum(cli.unnum)
        .with_force_text(cli.force)
        .with_binary_only(cli.binary)
        .with_preserve_modify_date(cli.modify)
        .with_fallback_lrecl(cli.lrecl);

    let archive = Archive::open_file(&cli.input, &config).map_err(|failure| {
        miette::Report::new(failure.error)
            .wrap_err(format!("failed to decode {}", cli.input.display()))
    })?;

    for warning in &archive.warnings {
        tracing::warn!("{warning}");
    }

    if cli.print {
        report::print_listing(&archive, cli.human);
    } else {
        extract::extract_all(&archive, &cli.outputdir, cli.quiet, config.preserve_modify_date)
            .into_diagnostic()
            .wrap_err("extraction failed")?;
    }

    if cli.json || cli.jsonfile.is_some() {
        let target = cli.jsonfile.unwrap_or_else(|| {
            let stem = cli
                .input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "archive".to_string());
            cli.outputdir.join(format!("{stem}.json"))
        });
        let json = open_xmit_archive::dump_json_string(&archive, JsonOptions { text: false });
        std::fs::write(&target, json)
            .into_diagnostic()
            .wrap_err_with(|| format!("cannot write {}", target.display()))?;
        if !cli.quiet {
            println!("metadata -> {}", target.display());
        }
    }

    Ok(())
}
