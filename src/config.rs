//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\moonsway\config.toml
//! - macOS: ~/Library/Application Support/moonsway/config.toml
//! - Linux: ~/.config/moonsway/config.toml
//!
//! The config file is human-readable and editable. Missing sections and
//! fields fall back to defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::failover::InstancePool;
use crate::model::Quality;
use crate::player::EngineSettings;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend instances per request class
    pub instances: InstancePool,

    /// Response cache settings
    pub cache: CacheConfig,

    /// Playback settings
    pub playback: PlaybackConfig,

    /// Local storage
    pub storage: StorageConfig,
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds
    pub ttl_secs: u64,

    /// Entries kept in memory before the oldest is evicted
    pub memory_capacity: usize,

    /// Seconds between expired-entry sweeps
    pub sweep_interval_secs: u64,

    /// Keep a durable copy in SQLite
    pub persistent: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            memory_capacity: 200,
            sweep_interval_secs: 5 * 60,
            persistent: true,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Preferred quality tier
    pub quality: Quality,

    /// Volume used when no snapshot exists (0.0 - 1.0)
    pub default_volume: f64,

    /// Seconds to wait for a source to become playable
    pub load_timeout_secs: u64,

    /// Save and restore playback state across runs
    pub persist: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            default_volume: 1.0,
            load_timeout_secs: 20,
            persist: true,
        }
    }
}

impl PlaybackConfig {
    /// Engine settings derived from this section.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            quality: self.quality,
            default_volume: self.default_volume.clamp(0.0, 1.0),
            load_timeout: Duration::from_secs(self.load_timeout_secs.max(1)),
            ..EngineSettings::default()
        }
    }
}

/// Local storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file (None = OS data directory)
    pub db_path: Option<PathBuf>,
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("moonsway"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => parse(&contents).unwrap_or_else(|e| {
            tracing::error!("Failed to parse config file {:?}: {}", path, e);
            tracing::warn!("Using default configuration");
            Config::default()
        }),
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Parse config text, normalizing instance URLs.
pub fn parse(contents: &str) -> Result<Config, toml::de::Error> {
    let mut config: Config = toml::from_str(contents)?;
    config.instances = InstancePool::new(
        std::mem::take(&mut config.instances.metadata),
        std::mem::take(&mut config.instances.streaming),
    );
    Ok(config)
}

/// Save configuration to disk
///
/// Creates the config directory if it doesn't exist.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    let path = dir.join("config.toml");

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::CreateDir(dir.clone(), e))?;

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, &path)
        .map_err(|e| ConfigError::Rename(temp_path, path.clone(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

/// Save configuration without blocking the runtime
pub async fn save_async(config: Config) -> Result<(), ConfigError> {
    tokio::task::spawn_blocking(move || save(&config))
        .await
        .map_err(|e| ConfigError::TaskJoin(e.to_string()))?
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

// ============================================================================
// Tests
// ============================================================================
