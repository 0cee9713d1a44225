//! # Memory Harness CLI (`mem`)
//!
//! The `mem` binary indexes a workspace's markdown memory notes and runs
//! hybrid searches over them.
//!
//! ## Usage
//!
//! ```bash
//! mem --config ./config/mem.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mem init` | Create the SQLite database and schema |
//! | `mem sync` | Index changed memory files |
//! | `mem search "<query>"` | Hybrid search over indexed chunks |
//! | `mem status` | Show counts and the active embedding provider |
//! | `mem get <path>` | Print a memory file or a line window of it |

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use memory_harness::config::{self, Config};
use memory_harness::index::MemoryIndex;
use memory_harness::progress::ProgressMode;
use memory_harness::sync::SyncReport;
use memory_harness::{db, get, migrate, search, status};

const DEFAULT_CONFIG: &str = "./config/mem.toml";

/// Memory Harness CLI: hybrid vector + keyword search over markdown memory
/// notes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the default file is absent, the current directory is used as
/// the workspace with default settings.
#[derive(Parser)]
#[command(
    name = "mem",
    about = "Memory Harness: hybrid search over markdown memory notes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Log sync and search activity to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent.
    Init,

    /// Index memory files.
    ///
    /// Re-chunks and re-embeds files whose content changed, removes files
    /// that disappeared, and rebuilds everything when the embedding
    /// provider or chunking settings changed.
    Sync {
        /// Rebuild the whole index. Cached embeddings are still reused.
        #[arg(long)]
        force: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Search indexed memory.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        max_results: Option<usize>,

        /// Drop results scoring below this threshold (0.0 to 1.0).
        #[arg(long)]
        min_score: Option<f64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index counts and the active embedding provider.
    Status {
        /// Print status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a memory file.
    Get {
        /// Workspace-relative path (e.g. `memory/2024-05-01.md`).
        path: String,

        /// First line to print (1-based).
        #[arg(long)]
        from: Option<usize>,

        /// Number of lines to print.
        #[arg(long)]
        lines: Option<usize>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Load the config file, or workspace defaults when the default path is
/// absent.
fn resolve_config(path: &Path) -> anyhow::Result<Config> {
    if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        let cwd = std::env::current_dir()?;
        tracing::debug!(workspace = %cwd.display(), "no config file, using defaults");
        return Ok(Config::for_workspace(&cwd));
    }
    config::load_config(path)
}

fn print_sync_report(report: &SyncReport) {
    println!("sync{}", if report.full_reindex { " (full reindex)" } else { "" });
    println!("  files indexed: {}", report.files_indexed);
    println!("  files unchanged: {}", report.files_unchanged);
    println!("  files removed: {}", report.files_removed);
    println!("  chunks written: {}", report.chunks_written);
    println!("  embeddings cached: {}", report.embeddings_cached);
    println!("  embeddings computed: {}", report.embeddings_computed);
    println!("ok");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = resolve_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            let schema = migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
            if !schema.fts_available {
                println!("Keyword search unavailable (FTS5 missing); running vector-only.");
            }
        }
        Commands::Sync { force, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();
            let index = MemoryIndex::open(cfg).await?;
            let report = index.sync_with_progress(force, reporter.as_ref()).await;
            index.close().await;
            print_sync_report(&report?);
        }
        Commands::Search {
            query,
            max_results,
            min_score,
            json,
        } => {
            search::run_search(&cfg, &query, max_results, min_score, json).await?;
        }
        Commands::Status { json } => {
            status::run_status(&cfg, json).await?;
        }
        Commands::Get { path, from, lines } => {
            get::run_get(&cfg, &path, from, lines).await?;
        }
    }

    Ok(())
}
