//! # kb-ingest CLI (`kbi`)
//!
//! Pulls team chat and wiki pages into a knowledge base of deduplicated
//! articles.
//!
//! ## Usage
//!
//! ```bash
//! kbi --config ./config/kbi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbi init` | Create the SQLite database and run schema setup |
//! | `kbi sync chat` | Ingest chat messages from the configured window |
//! | `kbi sync docs` | Ingest wiki pages modified in the configured window |
//! | `kbi stats` | Article counts and last run per source |
//! | `kbi get <id>` | Print one article as JSON |
//!
//! ## Examples
//!
//! ```bash
//! # Last 24 hours of chat (the scheduled job)
//! kbi sync chat
//!
//! # Backfill a date range without writing
//! kbi sync chat --since 2025-11-01 --until 2025-11-07 --dry-run
//!
//! # Wiki pages touched in the last week
//! kbi sync docs --hours 168
//! ```
//!
//! Logging goes to stderr and honours `RUST_LOG` (default `kb_ingest=info`).
//! The exit code is non-zero only when configuration is unusable.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use kb_ingest::config;
use kb_ingest::get;
use kb_ingest::ingest::{self, SyncArgs};
use kb_ingest::migrate;
use kb_ingest::stats;
use kb_ingest_core::models::SourceKind;

/// kb-ingest: chat and wiki ingestion into a deduplicated knowledge base.
#[derive(Parser)]
#[command(name = "kbi", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest from one source.
    ///
    /// Fetches everything in the window, files chat messages under the
    /// keyword articles they belong to, and upserts wiki pages by version.
    /// Re-running over the same window never duplicates content.
    Sync {
        /// Which source to ingest.
        source: SyncSource,

        /// Window length in hours, ending now. Defaults to `[run] window_hours`.
        #[arg(long, conflicts_with = "since")]
        hours: Option<i64>,

        /// Start of the window (YYYY-MM-DD, start of day UTC).
        #[arg(long)]
        since: Option<String>,

        /// End of the window (YYYY-MM-DD, end of day UTC).
        #[arg(long)]
        until: Option<String>,

        /// Plan writes and print counts without touching the store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show article counts and the last run of each source.
    Stats,

    /// Print an article by id as JSON.
    Get {
        /// Article UUID.
        id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SyncSource {
    Chat,
    Docs,
}

impl From<SyncSource> for SourceKind {
    fn from(source: SyncSource) -> Self {
        match source {
            SyncSource::Chat => SourceKind::Chat,
            SyncSource::Docs => SourceKind::Document,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kb_ingest=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            source,
            hours,
            since,
            until,
            dry_run,
        } => {
            let args = SyncArgs {
                hours,
                since,
                until,
                dry_run,
            };
            if ingest::run_sync(&cfg, source.into(), &args).await?.is_none() {
                println!("sync skipped: another run holds the lock");
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
    }

    Ok(())
}
