//! # fleetsync
//!
//! Operator CLI for the fleetsync offline-first sync engine.
//!
//! ## Commands
//!
//! - `init`: Write a default config and create the database
//! - `status`: Show queue counts and connectivity
//! - `queue`: List queue entries
//! - `write`: Optimistic local write (create, update, upsert, delete)
//! - `sync`: Drain the queue once against the remote
//! - `watch`: Run the sync loop until interrupted
//! - `pull`: Network-first read of a collection
//! - `purge`: Delete FAILED entries or the whole queue
//! - `resubmit`: Put a FAILED entry back in line
//!
//! ## Example
//!
//! ```bash
//! # Create fleetsync.toml and fleetsync.db
//! fleetsync init
//!
//! # Record a mission while offline
//! fleetsync --offline write create missions '{"id":"m-1","status":"PLANNED"}'
//!
//! # Push it once the network is back
//! fleetsync sync
//! fleetsync status
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod commands;
mod config;

use app::App;
use commands::{init, pull, purge, queue, resubmit, status, sync, watch, write};

/// Operator CLI for the fleetsync offline-first sync engine.
#[derive(Parser, Debug)]
#[command(name = "fleetsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = "fleetsync.toml")]
    config: PathBuf,

    /// Treat the remote as unreachable (writes only queue, reads use the cache)
    #[arg(long, global = true)]
    offline: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default config and create the database
    Init {
        /// Database file to create (default: fleetsync.db)
        #[arg(long)]
        database: Option<PathBuf>,

        /// Remote REST endpoint
        #[arg(long)]
        base_url: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show queue counts and connectivity
    Status,

    /// List queue entries
    Queue {
        /// Only FAILED entries
        #[arg(long)]
        failed: bool,
    },

    /// Optimistic local write + enqueue
    Write {
        #[command(subcommand)]
        op: WriteCommand,
    },

    /// Drain the queue once against the remote
    Sync,

    /// Run the sync loop until Ctrl-C
    Watch,

    /// Network-first read of a collection
    Pull {
        /// Collection name
        collection: String,
    },

    /// Delete FAILED entries or the whole queue (irreversible)
    Purge {
        /// Delete FAILED entries
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        failed: bool,

        /// Delete every entry, including unsynced work
        #[arg(long, conflicts_with = "failed")]
        all: bool,

        /// Confirm the irreversible deletion
        #[arg(long)]
        yes: bool,
    },

    /// Put a FAILED entry back to PENDING with a fresh retry budget
    Resubmit {
        /// Queue sequence number
        sequence: u64,
    },
}

#[derive(Subcommand, Debug)]
enum WriteCommand {
    /// Create a record (JSON object with an "id"; a UUID is generated if absent)
    Create { collection: String, json: String },
    /// Replace a record's fields by id
    Update { collection: String, json: String },
    /// Insert or merge on the collection's conflict key
    Upsert { collection: String, json: String },
    /// Delete a record by id
    Delete { collection: String, id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "fleetsync=debug"
    } else {
        "fleetsync=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init {
            database,
            base_url,
            force,
        } => init::run(&cli.config, database, base_url, force).await,
        command => {
            let app = App::open(&cli.config, cli.offline).await?;
            dispatch(&app, command).await
        }
    }
}

async fn dispatch(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Status => status::run(app).await,
        Commands::Queue { failed } => queue::run(app, failed).await,
        Commands::Write { op } => match op {
            WriteCommand::Create { collection, json } => {
                write::run(app, write::Kind::Create, &collection, &json).await
            }
            WriteCommand::Update { collection, json } => {
                write::run(app, write::Kind::Update, &collection, &json).await
            }
            WriteCommand::Upsert { collection, json } => {
                write::run(app, write::Kind::Upsert, &collection, &json).await
            }
            WriteCommand::Delete { collection, id } => write::delete(app, &collection, &id).await,
        },
        Commands::Sync => sync::run(app).await,
        Commands::Watch => watch::run(app).await,
        Commands::Pull { collection } => pull::run(app, &collection).await,
        Commands::Purge { all, yes, .. } => purge::run(app, all, yes).await,
        Commands::Resubmit { sequence } => resubmit::run(app, sequence).await,
    }
}
