//! Test utilities and fixtures for moonsway tests.
//!
//! Common helpers for tests across modules: a throwaway database and a
//! track factory. Seam-specific mocks (device, resolver, snapshot store,
//! scripted transport) live in `mocks` modules next to their traits.
//!
//! # Example
//!
//! ```ignore
//! use moonsway::test_utils::{temp_db, mock_track};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     let track = mock_track(1);
//!     // ... test logic
//! }
//! ```

use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::model::{AlbumRef, ArtistRef, Track};

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped. Migrations are run
/// automatically. Keep the TempDir alive for the duration of your test.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = format!("sqlite:{}", db_path.display());

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Creates a mock track with the given ID and sensible defaults.
///
/// Customize using struct update syntax:
///
/// ```ignore
/// let track = Track {
///     duration: 0,
///     ..mock_track(7)
/// };
/// ```
pub fn mock_track(id: u64) -> Track {
    Track {
        id,
        title: format!("Track {}", id),
        duration: 200,
        explicit: false,
        artist: ArtistRef {
            id: 100,
            name: "Test Artist".to_string(),
        },
        artists: Vec::new(),
        album: AlbumRef {
            id: 1000,
            title: "Test Album".to_string(),
            cover: Some("aa11bb22-cc33-dd44-ee55-ff6677889900".to_string()),
        },
        isrc: None,
        track_number: Some(id as u32),
        version: None,
        copyright: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;

        let plays = crate::db::recent_plays(&pool, 10).await.unwrap();
        assert!(plays.is_empty());
    }

    #[test]
    fn test_mock_track_defaults() {
        let track = mock_track(42);
        assert_eq!(track.id, 42);
        assert_eq!(track.title, "Track 42");
        assert_eq!(track.artist.name, "Test Artist");
        assert!(track.duration > 0);
        assert!(track.album.cover.is_some());
    }
}
