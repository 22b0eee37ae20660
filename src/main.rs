use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Deserialize;

use gtfs_merge::{merge_snapshot, ParquetStore};

#[derive(Parser)]
#[command(about = "Folds GTFS feed snapshots into normalized parquet tables")]
struct Cli {
    /// Root directory holding one table set per feed.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge a single snapshot archive.
    Merge {
        /// Feed identifier; tables land under `<data-dir>/<feed>/`.
        #[arg(long)]
        feed: String,
        /// Path to the snapshot zip.
        #[arg(long)]
        archive: PathBuf,
        /// Publication date of the snapshot, e.g. 2024-01-15.
        #[arg(long)]
        modified: NaiveDate,
    },
    /// Merge an ordered history of snapshots listed in a JSON manifest.
    Ingest {
        #[arg(long)]
        feed: String,
        /// JSON file: `{"snapshots": [{"path": "...", "modified": "2024-01-15"}, ...]}`.
        #[arg(long)]
        manifest: PathBuf,
    },
}

#[derive(Deserialize)]
struct Manifest {
    snapshots: Vec<SnapshotEntry>,
}

#[derive(Deserialize)]
struct SnapshotEntry {
    path: PathBuf,
    modified: NaiveDate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    simple_logger::SimpleLogger::new().with_level(level).init()?;

    let store = ParquetStore::new(&cli.data_dir);
    match cli.command {
        Command::Merge {
            feed,
            archive,
            modified,
        } => {
            let bytes = std::fs::read(&archive)
                .with_context(|| format!("failed to read archive {:?}", archive))?;
            let summary = merge_snapshot(&store, &feed, &bytes, modified)?;
            log::info!("Merged {:?} into feed `{}`: {}", archive, feed, summary);
        }
        Command::Ingest { feed, manifest } => {
            let file = std::fs::File::open(&manifest)
                .with_context(|| format!("failed to open manifest {:?}", manifest))?;
            let manifest: Manifest =
                serde_json::from_reader(file).context("failed to parse manifest")?;

            let style = indicatif::ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>4}/{len:4} {msg}",
            )
            .unwrap();
            let bar = indicatif::ProgressBar::new(manifest.snapshots.len() as u64)
                .with_style(style);
            for entry in &manifest.snapshots {
                bar.set_message(format!("{:?}", entry.path));
                // One bad snapshot must not stop the replay of the rest.
                match std::fs::read(&entry.path) {
                    Ok(bytes) => match merge_snapshot(&store, &feed, &bytes, entry.modified) {
                        Ok(summary) => log::info!("Merged {:?}: {}", entry.path, summary),
                        Err(err) => log::warn!("Skipping snapshot {:?}: {}", entry.path, err),
                    },
                    Err(err) => log::warn!("Failed to read snapshot {:?}: {}", entry.path, err),
                }
                bar.inc(1);
            }
            bar.finish();
        }
    }
    Ok(())
}
