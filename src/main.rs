//! # Reachy Mini bot CLI (`reachy-bot`)
//!
//! Runs the Discord bot and the offline maintenance commands around its
//! vector store. Settings come from the environment (and an optional `.env`
//! file); see [`reachy_mini_bot::config`].
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reachy-bot run` | Connect to Discord and answer mentions (default) |
//! | `reachy-bot ingest <folder>` | Extract, chunk, embed and store a folder |
//! | `reachy-bot query "<text>"` | Print the chunks retrieved for a question |
//! | `reachy-bot stats` | Print chunk counts for the collection |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use reachy_mini_bot::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use reachy_mini_bot::config::{Requirement, Settings};
use reachy_mini_bot::rag::RagStore;
use reachy_mini_bot::{discord, ingest, search, stats};

/// Reachy Mini support bot: Discord answers backed by retrieval over your docs.
#[derive(Parser)]
#[command(name = "reachy-bot", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Discord bot.
    Run,

    /// Ingest every supported file under a folder.
    ///
    /// Walks the folder recursively, extracts text from .txt, .md, .log,
    /// .html and .pdf files, chunks it and upserts the chunks. Re-running
    /// over the same folder replaces earlier chunks.
    Ingest {
        /// Folder to ingest.
        folder: PathBuf,

        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
        overlap: usize,
    },

    /// Show the chunks a question would retrieve.
    Query {
        text: String,

        /// Number of chunks to return.
        #[arg(long, short, default_value_t = 5)]
        k: usize,
    },

    /// Show collection statistics.
    Stats,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let settings = Settings::from_env()?;
            tracing::debug!(?settings, "loaded settings");
            discord::run_bot(settings).await?;
        }
        Commands::Ingest {
            folder,
            chunk_size,
            overlap,
        } => {
            let settings = Settings::from_env_for(Requirement::OpenAiOnly)?;
            let rag = RagStore::from_settings(&settings).await?;
            let result = ingest::ingest_folder(&folder, &rag, chunk_size, overlap)
                .await
                .with_context(|| format!("Ingestion of {} failed", folder.display()))?;

            println!("ingest {}", folder.display());
            println!("  files found: {}", result.files_found);
            println!("  files ingested: {}", result.files_ingested);
            if result.files_blank > 0 {
                println!("  blank files skipped: {}", result.files_blank);
            }
            println!("  chunks written: {}", result.chunks_written);
            println!("  collection: {}", rag.collection());
            println!("ok");
        }
        Commands::Query { text, k } => {
            let settings = Settings::from_env_for(Requirement::OpenAiOnly)?;
            search::run_query(&settings, &text, k).await?;
        }
        Commands::Stats => {
            let settings = Settings::from_env_for(Requirement::OpenAiOnly)?;
            stats::run_stats(&settings).await?;
        }
    }

    Ok(())
}
