//! # Guide Index CLI (`guidex`)
//!
//! ## Usage
//!
//! ```bash
//! guidex --config ./config/guidex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `guidex init` | Create the descriptor sets of every pipeline |
//! | `guidex sets` | List pipelines and the state of their sets |
//! | `guidex ingest <PATH>...` | Extract, embed and index PDFs |
//! | `guidex query "<text>"` | Find the best-matching guide |
//! | `guidex extract <PDF>` | Show the headings (and images) of one PDF |
//!
//! ## Examples
//!
//! ```bash
//! # Create both default sets
//! guidex init
//!
//! # Index a directory of guides with headings and screenshots
//! guidex ingest ./guides --pipeline multimodal
//!
//! # Ask a question, machine-readable
//! guidex query "invite a teammate" --json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use guide_index::config;
use guide_index::{extract_cmd, ingest, query, sets};

/// Guide Index: retrieve the instructional PDF that answers a question.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/guidex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "guidex",
    about = "Index instructional PDFs and retrieve the guide that matches a task",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/guidex.toml")]
    config: PathBuf,

    /// More log output on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create descriptor sets.
    ///
    /// Idempotent. Fails when a set exists with other dimensions.
    Init {
        /// Pipeline name, or `all` (default).
        #[arg(long)]
        pipeline: Option<String>,
    },

    /// List configured pipelines and the status of their sets.
    Sets,

    /// Extract, embed and index PDFs.
    ///
    /// Each PATH is a PDF or a directory searched recursively for PDFs.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Pipeline name (defaults to `default_pipeline`).
        #[arg(long)]
        pipeline: Option<String>,

        /// Show heading and image counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Retrieve the best-matching heading or image for a question.
    Query {
        query: String,

        /// Pipeline name (defaults to `default_pipeline`).
        #[arg(long)]
        pipeline: Option<String>,

        /// Print the match as JSON (`null` when nothing matched).
        #[arg(long)]
        json: bool,
    },

    /// Show the headings extracted from one PDF.
    Extract {
        pdf: PathBuf,

        /// Also extract images into the artifacts directory.
        #[arg(long)]
        images: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    tracing::debug!(config = %cli.config.display(), "loaded configuration");

    match cli.command {
        Commands::Init { pipeline } => {
            sets::run_init(&cfg, pipeline.as_deref()).await?;
        }
        Commands::Sets => {
            sets::run_sets(&cfg).await?;
        }
        Commands::Ingest {
            paths,
            pipeline,
            dry_run,
        } => {
            ingest::run_ingest(&cfg, &paths, pipeline.as_deref(), dry_run).await?;
        }
        Commands::Query {
            query,
            pipeline,
            json,
        } => {
            query::run_query(&cfg, &query, pipeline.as_deref(), json).await?;
        }
        Commands::Extract { pdf, images } => {
            extract_cmd::run_extract(&cfg, &pdf, images)?;
        }
    }

    Ok(())
}
