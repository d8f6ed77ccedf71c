//! detection_log - inspect, export and migrate the detection log
//!
//! Works without a detector: the log is readable even when the model is not.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use detection_session::store::DEFAULT_LEGACY_CLASS;
use detection_session::{CsvLogStore, DetectionRecord, Migration, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "detection_log", about = "Inspect, export and migrate the detection log")]
struct Args {
    /// Detection log path; overrides DETECT_LOG_PATH and the config file.
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the log as a table
    Show {
        /// Only rows for this image
        #[arg(long)]
        image: Option<String>,
    },

    /// Write the log as CSV to a file, or stdout when no file is given
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Rewrite a two-column legacy log (Image Name, Confidence) into the current schema
    Migrate {
        /// Class name recorded for migrated rows
        #[arg(long, default_value = DEFAULT_LEGACY_CLASS)]
        class_name: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let log_path = match args.log {
        Some(path) => path,
        None => SessionConfig::load()?.log_path,
    };
    let store = CsvLogStore::new(log_path);

    match args.command {
        Command::Show { image } => {
            let log = store.load()?;
            println!("{:<32} {:<24} {:>10}", "Image Name", "Class Name", "Confidence");
            let records: Box<dyn Iterator<Item = &DetectionRecord> + '_> =
                match image.as_deref() {
                    Some(name) => Box::new(log.records_for(name)),
                    None => Box::new(log.iter()),
                };
            let mut shown = 0usize;
            for record in records {
                println!(
                    "{:<32} {:<24} {:>10.4}",
                    record.image_name, record.class_name, record.confidence
                );
                shown += 1;
            }
            println!("{} of {} records", shown, log.len());
        }
        Command::Export { out } => {
            let bytes = store.load()?.export()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("detection log exported to {}", path.display());
                }
                None => std::io::stdout().write_all(&bytes)?,
            }
        }
        Command::Migrate { class_name } => match store.migrate_legacy(&class_name)? {
            Migration::Missing => {
                println!("no detection log at {}", store.path().display())
            }
            Migration::AlreadyCanonical => {
                println!("{} already uses the current schema", store.path().display())
            }
            Migration::Migrated { rows } => println!(
                "migrated {} rows in {} (class name \"{}\")",
                rows,
                store.path().display(),
                class_name
            ),
        },
    }
    Ok(())
}
