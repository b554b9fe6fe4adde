//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `catalog`: Search and lookups against the backend instances
//! - `cache`: Response cache maintenance
//! - `play`: Headless playback and play history
//! - `settings`: Effective configuration

mod cache;
mod catalog;
mod play;
mod settings;

use clap::{Parser, Subcommand, ValueEnum};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use crate::api::MusicApi;
use crate::cache::{DurableStore, ResponseCache, SystemClock};
use crate::config::{self, Config};
use crate::db;
use crate::error::{self, ResultExt};
use crate::failover::{FailoverClient, ReqwestTransport};
use crate::model::Quality;

pub use cache::{cmd_cache_clear, cmd_cache_sweep};
pub use catalog::{cmd_album, cmd_artist, cmd_playlist, cmd_search, cmd_stream};
pub use play::{cmd_history, cmd_play};
pub use settings::cmd_config;

/// Per-request timeout for backend calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Moonsway CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Database file (overrides the config)
    #[arg(long, global = true, env = "MOONSWAY_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Search the catalog
    Search {
        /// Search text
        query: String,
        /// What to search for
        #[arg(short, long, value_enum, default_value_t = SearchTarget::Tracks)]
        kind: SearchTarget,
    },
    /// Show an album and its tracks
    Album {
        /// Album ID
        id: u64,
    },
    /// Show an artist's top tracks and albums
    Artist {
        /// Artist ID
        id: u64,
    },
    /// Show a playlist and its tracks
    Playlist {
        /// Playlist UUID
        id: String,
    },
    /// Resolve a playable stream URL for a track
    Stream {
        /// Track ID
        track_id: u64,
        /// Quality tier (LOW, HIGH, LOSSLESS, HI_RES_LOSSLESS)
        #[arg(short, long)]
        quality: Option<Quality>,
    },
    /// Manage the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Play tracks until the queue ends or Ctrl-C
    Play {
        /// Track IDs, in queue order (none resumes the last session)
        track_ids: Vec<u64>,
        /// Quality tier (overrides the config)
        #[arg(short, long)]
        quality: Option<Quality>,
        /// Shuffle the queue
        #[arg(long)]
        shuffle: bool,
    },
    /// Show recently played tracks
    History {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Print the config file path and effective settings
    Config {
        /// Write the effective settings to the config file if it doesn't exist
        #[arg(long)]
        init: bool,
    },
}

/// Cache maintenance actions
#[derive(Subcommand)]
pub enum CacheAction {
    /// Remove every cached response
    Clear,
    /// Remove expired responses
    Sweep,
}

/// Search categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchTarget {
    Tracks,
    Albums,
    Artists,
    Playlists,
}

/// Run the parsed command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let mut config = config::load();
    if let Some(db) = &cli.db {
        config.storage.db_path = Some(db.clone());
    }

    match &cli.command {
        Commands::Search { query, kind } => cmd_search(&rt, &config, query, *kind),
        Commands::Album { id } => cmd_album(&rt, &config, *id),
        Commands::Artist { id } => cmd_artist(&rt, &config, *id),
        Commands::Playlist { id } => cmd_playlist(&rt, &config, id),
        Commands::Stream { track_id, quality } => {
            cmd_stream(&rt, &config, *track_id, quality.unwrap_or(config.playback.quality))
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear => cmd_cache_clear(&rt, &config),
            CacheAction::Sweep => cmd_cache_sweep(&rt, &config),
        },
        Commands::Play {
            track_ids,
            quality,
            shuffle,
        } => cmd_play(&rt, &config, track_ids, *quality, *shuffle),
        Commands::History { limit } => cmd_history(&rt, &config, *limit),
        Commands::Config { init } => cmd_config(&rt, &config, *init),
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Open the database named by the config.
pub(crate) async fn open_db(config: &Config) -> error::Result<SqlitePool> {
    let url = db::db_url(config.storage.db_path.as_deref());
    debug!(target: "cli", %url, "Opening database");
    db::init_db(&url)
        .await
        .with_context(format!("opening database {}", url))
}

/// Build the cached catalog client from config.
pub(crate) fn build_api(config: &Config, pool: &SqlitePool) -> anyhow::Result<MusicApi> {
    let durable = config
        .cache
        .persistent
        .then(|| DurableStore::new(pool.clone()));
    let cache = ResponseCache::new(
        durable,
        config.cache.memory_capacity,
        config.cache.ttl(),
        Arc::new(SystemClock),
    );

    let transport = ReqwestTransport::new(REQUEST_TIMEOUT)?;
    let client = FailoverClient::new(Arc::new(transport), config.instances.clone());
    let api = MusicApi::new(client, Arc::new(cache));

    let instances = api.client().pool();
    if instances.metadata.is_empty() || instances.streaming.is_empty() {
        warn!(
            target: "cli",
            "No backend instances configured; add them under [instances] in {}",
            config::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "config.toml".to_string())
        );
    }
    Ok(api)
}

/// "m:ss" for whole seconds.
pub(crate) fn format_duration(seconds: u32) -> String {
    crate::player::format_time(f64::from(seconds))
}
