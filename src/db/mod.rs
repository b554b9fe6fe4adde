//! Database module for durable local state.
//!
//! Uses SQLx with SQLite for lightweight, embedded storage. Holds:
//! - The durable tier of the response cache (`response_cache`, see
//!   [`crate::cache`])
//! - A small key-value table (`kv_store`) used for the playback snapshot
//! - Play history (`play_history`)
//!
//! # Example
//!
//! ```ignore
//! use moonsway::db::{init_db, kv_get};
//!
//! let pool = init_db("sqlite:moonsway.db").await?;
//! let snapshot = kv_get(&pool, "playback_state").await?;
//! ```

use std::path::{Path, PathBuf};

use crate::model::Track;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "moonsway.db";

/// Default database location in the OS data directory.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("moonsway")
        .join(DEFAULT_DB_NAME)
}

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`default_db_path`].
pub fn db_url(path: Option<&Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", default_db_path().display()),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file (and its parent directory) if it doesn't
/// exist, establishes a connection pool with up to 5 connections, and
/// runs all pending migrations.
///
/// # Errors
///
/// Returns an error if:
/// - Database creation fails
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = db_url
        .strip_prefix("sqlite:")
        .map(Path::new)
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }

    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Read a value from the key-value store.
pub async fn kv_get(pool: &SqlitePool, key: &str) -> sqlx::Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v))
}

/// Insert or replace a value in the key-value store.
pub async fn kv_set(pool: &SqlitePool, key: &str, value: &str) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO kv_store (key, value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}

/// A play-history row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryEntry {
    /// Row ID
    pub id: i64,
    /// Catalog track ID
    pub track_id: i64,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Full track as JSON, for re-queueing
    pub track_json: String,
    /// Epoch milliseconds
    pub played_at: i64,
}

impl HistoryEntry {
    /// Decode the stored track.
    pub fn track(&self) -> Option<Track> {
        serde_json::from_str(&self.track_json).ok()
    }
}

/// Append a track to the play history.
pub async fn record_play(pool: &SqlitePool, track: &Track) -> sqlx::Result<i64> {
    let track_json = serde_json::to_string(track).unwrap_or_default();
    let result = sqlx::query(
        r#"
        INSERT INTO play_history (track_id, title, artist, album, track_json, played_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(track.id as i64)
    .bind(track.display_title())
    .bind(track.artist_names())
    .bind(&track.album.title)
    .bind(track_json)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Most recent plays, newest first.
pub async fn recent_plays(pool: &SqlitePool, limit: u32) -> sqlx::Result<Vec<HistoryEntry>> {
    sqlx::query_as::<_, HistoryEntry>(
        r#"
        SELECT id, track_id, title, artist, album, track_json, played_at
        FROM play_history
        ORDER BY played_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await
}
