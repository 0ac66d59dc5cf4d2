//! # llm-index CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `llm-index init` | Create the SQLite database and run migrations |
//! | `llm-index collections` | List configured collections |
//! | `llm-index sync` | Apply collection changes and index missing documents |
//! | `llm-index reindex [COLLECTION] [--full]` | Sweep, or fully reindex, collections |
//! | `llm-index notify <created\|updated\|deleted> <ID>` | Report a document change |
//! | `llm-index doc put\|rm\|ls` | Manage documents of managed collections |
//! | `llm-index chunk <FILE>` | Preview chunking of a file |
//! | `llm-index stats` | Show index statistics |
//!
//! ## Examples
//!
//! ```bash
//! llm-index --config ./config/llm-index.toml init
//! llm-index sync
//! llm-index notify updated main:Help.Install
//! llm-index doc put notes readme --file README.md
//! llm-index chunk README.md --max 500 --overlap 50
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use llm_index::{config, db, documents, logging, migrate, preview, stats, sync};

/// Collection indexing pipeline for retrieval-augmented generation.
#[derive(Parser)]
#[command(name = "llm-index", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/llm-index.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Idempotent.
    Init,

    /// List configured collections.
    Collections,

    /// Apply configuration changes to the index.
    ///
    /// Diffs the configured collections against the last applied set,
    /// handles the resulting events, sweeps every collection for documents
    /// that aren't indexed yet, and runs the queue to completion.
    Sync,

    /// Sweep collections again.
    Reindex {
        /// `tenant:id`, or an id in the primary tenant. Defaults to all.
        collection: Option<String>,

        /// Reindex every document, not only the missing ones.
        #[arg(long)]
        full: bool,
    },

    /// Report a change to a document made outside this tool.
    Notify {
        /// `created`, `updated` or `deleted`.
        action: String,

        /// `tenant:Space.Page` for mirrored pages, `tenant:collection/name`
        /// for managed documents.
        document_id: String,
    },

    /// Manage documents of managed collections.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Preview how a file would be chunked.
    Chunk {
        file: PathBuf,

        #[arg(long, default_value_t = 1000)]
        max: usize,

        #[arg(long, default_value_t = 200)]
        overlap: usize,

        /// `character` or `section`.
        #[arg(long, default_value = "character")]
        method: String,
    },

    /// Show index statistics.
    Stats,
}

#[derive(Subcommand)]
enum DocAction {
    /// Create or replace a document from a file and index it.
    Put {
        collection: String,
        name: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        title: Option<String>,
    },
    /// Delete a document and purge it from the index.
    Rm { collection: String, name: String },
    /// List the documents of a collection.
    Ls { collection: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Chunk {
        file,
        max,
        overlap,
        method,
    } = &cli.command
    {
        logging::init();
        return preview::run_chunk(file, *max, *overlap, method);
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init_with_config(&cfg.logging);

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Collections => sync::list_collections(&cfg)?,
        Commands::Sync => sync::run_sync(&cfg).await?,
        Commands::Reindex { collection, full } => {
            sync::run_reindex(&cfg, collection.as_deref(), full).await?;
        }
        Commands::Notify {
            action,
            document_id,
        } => sync::run_notify(&cfg, &action, &document_id).await?,
        Commands::Doc { action } => match action {
            DocAction::Put {
                collection,
                name,
                file,
                title,
            } => documents::run_put(&cfg, &collection, &name, &file, title).await?,
            DocAction::Rm { collection, name } => {
                documents::run_rm(&cfg, &collection, &name).await?;
            }
            DocAction::Ls { collection } => documents::run_ls(&cfg, &collection).await?,
        },
        Commands::Chunk { .. } => {}
        Commands::Stats => stats::run_stats(&cfg).await?,
    }

    Ok(())
}
