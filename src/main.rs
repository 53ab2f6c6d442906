//! # Bookshelf CLI (`shelf`)
//!
//! The `shelf` binary is the primary interface for Bookshelf. It provides
//! commands for ingesting documents into a content-addressed library,
//! building search indices, querying them, and repairing a library after
//! a crash or manual edits.
//!
//! ## Usage
//!
//! ```bash
//! shelf --config ./shelf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shelf ingest` | Scan the source directory and incrementally ingest new documents |
//! | `shelf build-index` | Rebuild the sparse + dense search indices from ready books |
//! | `shelf search "<query>"` | Run a hybrid search over the index |
//! | `shelf repair` | Reconcile the manifest with on-disk state |
//! | `shelf status` | Print library health and per-book status |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest everything under [sources].dir and rebuild the index
//! shelf ingest --config ./shelf.toml
//!
//! # Ingest from an explicit directory, without rebuilding the index
//! shelf ingest --source-dir ./docs --no-index
//!
//! # Query the library
//! shelf search "atomic rename crash safety" --limit 5
//!
//! # Check what repair would do, then do it
//! shelf repair --mode verify
//! shelf repair
//! ```

mod atomic;
mod config;
mod dense;
mod extract;
mod index;
mod ingest;
mod library;
mod models;
mod repair;
mod retrieve;
mod sparse;
mod status;
mod tokenize;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use repair::RepairMode;

/// Bookshelf CLI — a content-addressed document library with hybrid
/// lexical + semantic retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/shelf.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "shelf",
    about = "Bookshelf — a content-addressed document library with hybrid retrieval",
    version,
    long_about = "Bookshelf ingests documents into a content-addressed, crash-safe library \
    (every write is an atomic file replacement), builds BM25 and dense-vector indices over \
    their chunks, and answers hybrid queries with a diversity-filtered ranked result list."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./shelf.toml`. The library root, source directory,
    /// chunking, and retrieval settings are read from this file.
    #[arg(long, global = true, default_value = "./shelf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Incrementally ingest documents from the source directory.
    ///
    /// Scans for matching files, skips sources whose content hash is
    /// already `ready`, chunks and stores the rest, infers version
    /// supersession, and rebuilds the index when anything changed.
    Ingest {
        /// Ingest from this directory instead of `[sources].dir`.
        #[arg(long)]
        source_dir: Option<PathBuf>,

        /// Show what would be ingested without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Skip the index rebuild even if book state changed.
        #[arg(long)]
        no_index: bool,
    },

    /// Rebuild the search indices from all ready books.
    ///
    /// Re-reads every ready book's chunk file, re-tokenizes, and writes a
    /// fresh set of index artifacts, swapped in atomically as a set.
    BuildIndex,

    /// Search the library.
    ///
    /// Runs a hybrid query over the index and prints ranked results with
    /// their score components. Fails with a clear message when no index
    /// has been built yet.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Reconcile the manifest with on-disk book folders.
    ///
    /// Reconstructs missing book metadata, marks books without chunks as
    /// errored, prunes orphaned temporary files, and re-infers version
    /// supersession. `--mode verify` reports without writing.
    Repair {
        /// `verify` reports what would change; `repair` applies it.
        #[arg(long, value_enum, default_value_t = RepairModeArg::Repair)]
        mode: RepairModeArg,

        /// Keep orphaned `.tmp` files instead of deleting them.
        #[arg(long)]
        no_prune: bool,

        /// Skip the index rebuild even if repair changed book state.
        #[arg(long)]
        no_index: bool,
    },

    /// Print library health and per-book status.
    ///
    /// Shows book counts by state, chunk totals, index presence, and a
    /// cached consistency check against on-disk folders.
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RepairModeArg {
    Verify,
    Repair,
}

impl From<RepairModeArg> for RepairMode {
    fn from(mode: RepairModeArg) -> Self {
        match mode {
            RepairModeArg::Verify => RepairMode::Verify,
            RepairModeArg::Repair => RepairMode::Repair,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            source_dir,
            dry_run,
            no_index,
        } => {
            ingest::run_ingest(&cfg, source_dir, dry_run, no_index)?;
        }
        Commands::BuildIndex => {
            index::run_build_index(&cfg)?;
        }
        Commands::Search { query, limit } => {
            retrieve::run_search(&cfg, &query, limit)?;
        }
        Commands::Repair {
            mode,
            no_prune,
            no_index,
        } => {
            repair::run_repair(&cfg, mode.into(), !no_prune, no_index)?;
        }
        Commands::Status => {
            status::run_status(&cfg)?;
        }
    }

    Ok(())
}
