//! shale CLI binary: inspect a database read-only.

use std::io::Write;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::LevelFilter;
use serde::Serialize;

use shale::changeset::get_changeset_revisions;
use shale::Database;

#[derive(Parser)]
#[command(name = "shale", version, about = "Inspect shale databases")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Increase verbosity (-v, -vv, ...)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a database.
    Info {
        /// Database directory.
        dir: PathBuf,
    },
    /// List metadata entries.
    Metadata {
        /// Database directory.
        dir: PathBuf,

        /// Only keys starting with this prefix.
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// List indexed terms with their frequencies.
    Terms {
        /// Database directory.
        dir: PathBuf,

        /// Only terms starting with this prefix.
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// List changeset files and the revision ranges they cover.
    Changesets {
        /// Database directory.
        dir: PathBuf,
    },
}

#[derive(Serialize)]
struct Info {
    uuid: String,
    revision: u64,
    doc_count: u32,
    last_docid: u32,
    avg_length: f64,
    total_length: u64,
    has_positions: bool,
}

fn main() {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    if let Err(e) = run(args.command) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Info { dir } => {
            let db = Database::open(&dir)
                .with_context(|| format!("opening database at {}", dir.display()))?;
            let info = Info {
                uuid: db.uuid().to_string(),
                revision: db.revision(),
                doc_count: db.doc_count()?,
                last_docid: db.last_docid(),
                avg_length: db.avg_length()?,
                total_length: db.total_length(),
                has_positions: db.has_positions()?,
            };
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Metadata { dir, prefix } => {
            let db = Database::open(&dir)
                .with_context(|| format!("opening database at {}", dir.display()))?;
            for key in db.metadata_keys(prefix.as_bytes())? {
                let value = db.metadata(&key)?;
                println!(
                    "{} = {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Command::Terms { dir, prefix } => {
            let db = Database::open(&dir)
                .with_context(|| format!("opening database at {}", dir.display()))?;
            for (term, termfreq, collfreq) in db.all_terms(prefix.as_bytes())? {
                println!(
                    "{}\ttermfreq={termfreq}\tcollfreq={collfreq}",
                    String::from_utf8_lossy(&term)
                );
            }
        }
        Command::Changesets { dir } => {
            let mut names: Vec<String> = std::fs::read_dir(&dir)
                .with_context(|| format!("reading {}", dir.display()))?
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| {
                    name.strip_prefix("changes")
                        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
                })
                .collect();
            names.sort_by_key(|name| name[7..].parse::<u64>().unwrap_or(u64::MAX));
            for name in names {
                let (start, end) = get_changeset_revisions(dir.join(&name))?;
                println!("{name}\t{start} -> {end}");
            }
        }
    }
    Ok(())
}
