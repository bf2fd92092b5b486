use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pgnstore::cli::{annotate, checkpoints, games, ingest, openings, players, stats};
use pgnstore::config::{BackendKind, Config};
use pgnstore::model::GameAnnotation;
use pgnstore::store::open_store;

#[derive(Parser)]
#[command(name = "pgnstore")]
#[command(about = "Streaming PGN ingestion with player and opening statistics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "pgnstore.yaml")]
    config: String,

    /// Storage backend, overrides the config file
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest PGN files (.pgn, .pgn.zst) or directories of them
    Ingest {
        /// Files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Stop after this many accepted games
        #[arg(long)]
        max_games: Option<u64>,

        /// Flush after this many buffered games
        #[arg(long)]
        batch_records: Option<usize>,

        /// Flush once buffered games are estimated to use this many bytes
        #[arg(long)]
        batch_bytes: Option<usize>,
    },

    /// Patch engine annotations on a stored game
    Annotate {
        /// Game ID (Site URL id or content hash)
        game_id: String,

        #[arg(long)]
        white_accuracy: Option<f64>,

        #[arg(long)]
        black_accuracy: Option<f64>,

        /// Average centipawn loss
        #[arg(long)]
        acpl: Option<i32>,
    },

    /// List openings by popularity
    Openings {
        /// Hide openings with fewer games
        #[arg(long, default_value_t = 1)]
        min_games: i64,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one opening and its latest games
    Opening {
        /// ECO code, e.g. B01
        code: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// List players by current rating
    Players {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show a player and their rating history
    Player { username: String },

    /// List a player's games, newest first
    Games {
        username: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// List recent ingestion runs
    Checkpoints {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Show statistics
    Stats,
}

fn init_logging(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;
    if let Some(backend) = cli.backend {
        config.storage.backend = backend;
    }
    if let Commands::Ingest {
        batch_records,
        batch_bytes,
        ..
    } = &cli.command
    {
        if let Some(records) = batch_records {
            config.ingest.max_batch_records = *records;
        }
        if let Some(bytes) = batch_bytes {
            config.ingest.max_batch_bytes = *bytes;
        }
    }
    config.validate()?;

    init_logging(&config);

    // Initialize store
    let mut store = open_store(&config).context("failed to open store")?;

    match cli.command {
        Commands::Ingest {
            paths, max_games, ..
        } => {
            ingest::run(store.as_mut(), &config, &paths, max_games)?;
        }
        Commands::Annotate {
            game_id,
            white_accuracy,
            black_accuracy,
            acpl,
        } => {
            let annotation = GameAnnotation {
                white_accuracy,
                black_accuracy,
                acpl,
            };
            annotate::run(store.as_mut(), &game_id, annotation)?;
        }
        Commands::Openings { min_games, limit } => {
            openings::list(store.as_ref(), min_games, limit)?;
        }
        Commands::Opening { code, limit } => {
            openings::show(store.as_ref(), &code, limit)?;
        }
        Commands::Players { limit } => {
            players::list(store.as_ref(), limit)?;
        }
        Commands::Player { username } => {
            players::show(store.as_ref(), &username)?;
        }
        Commands::Games { username, limit } => {
            games::run(store.as_ref(), &username, limit)?;
        }
        Commands::Checkpoints { limit } => {
            checkpoints::run(store.as_ref(), limit)?;
        }
        Commands::Stats => {
            stats::run(store.as_ref())?;
        }
    }

    Ok(())
}
