//! # Catalog Hub CLI (`hub`)
//!
//! The `hub` binary initializes the catalog database, ingests remote
//! indexes, and runs searches and lookups against the catalog.
//!
//! ## Usage
//!
//! ```bash
//! hub --config ./config/hub.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hub init` | Create the SQLite database and run schema migrations |
//! | `hub ingest` | Ingest every configured remote (or `--remote URL`) |
//! | `hub search "<query>"` | Ranked catalog search |
//! | `hub get <uid>` | Show one entity and its chunks |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use catalog_hub::models::EntityType;
use catalog_hub::search::engine::SearchRequest;
use catalog_hub::search::SearchMode;
use catalog_hub::{config, get, ingest, migrate, search};

/// Catalog Hub: catalog ingestion and hybrid search for agents, tools and
/// protocol servers.
#[derive(Parser)]
#[command(name = "hub", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent. The vector encoding is fixed the first time this runs.
    Init,

    /// Ingest remote catalog indexes.
    Ingest {
        /// Index URL to ingest instead of `[ingest].remotes`. Repeatable.
        #[arg(long = "remote")]
        remotes: Vec<String>,
    },

    /// Search the catalog.
    Search {
        query: String,

        /// `keyword`, `semantic`, or `hybrid`.
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,

        /// Restrict to entity types (`agent`, `tool`, `protocol_server`). Repeatable.
        #[arg(long = "type")]
        types: Vec<EntityType>,

        /// Include entities that are not registered yet.
        #[arg(long)]
        include_pending: bool,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show an entity by uid (`type:id@version`).
    Get { uid: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
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
        Commands::Ingest { remotes } => {
            ingest::run_ingest(&cfg, &remotes).await?;
        }
        Commands::Search {
            query,
            mode,
            types,
            include_pending,
            limit,
            offset,
        } => {
            let request = SearchRequest {
                mode,
                types,
                // The flag only widens visibility; otherwise use the config default.
                include_pending: include_pending.then_some(true),
                limit,
                offset,
                ..SearchRequest::new(&query)
            };
            search::run_search(&cfg, &request).await?;
        }
        Commands::Get { uid } => {
            get::run_get(&cfg, &uid).await?;
        }
    }

    Ok(())
}
