//! Folio - operator CLI for a local Folio store.
//!
//! Works on the store configured through `FOLIO_*` environment variables,
//! treating every collection as raw (schema-less) data.

use clap::{Parser, Subcommand};
use folio_engine::{ExportBundle, SchemaRegistry};
use folio_store::{ImportMode, Store, StoreConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Inspect and maintain a local Folio store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print record counts, pending sync entries and the active adapter
    Stats,
    /// Write every collection as an export bundle
    Export {
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Load an export bundle, replacing the collections it contains
    Import {
        file: PathBuf,
        /// Merge into existing records instead of replacing them
        #[arg(long)]
        merge: bool,
    },
    /// Delete every record and the backing storage
    Reset,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = StoreConfig::from_env()?;

    tracing::debug!(data_dir = %config.data_dir.display(), "Opening store");
    let store = Store::from_config(&config, SchemaRegistry::new()).await?;

    match cli.command {
        Command::Stats => {
            let stats = store.get_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Export { out } => {
            let json = store.export_all().await?.to_json_pretty()?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    tracing::info!(path = %path.display(), "Wrote export bundle");
                }
                None => println!("{json}"),
            }
        }
        Command::Import { file, merge } => {
            let raw = tokio::fs::read_to_string(&file).await?;
            let bundle = ExportBundle::from_json(&raw)?;
            let mode = if merge {
                ImportMode::Merge
            } else {
                ImportMode::Replace
            };
            let written = store.import_all(bundle, mode).await?;
            println!("imported {written} records");
        }
        Command::Reset => {
            store.reset().await?;
            println!("store reset");
        }
    }

    Ok(())
}
