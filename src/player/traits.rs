//! Collaborator traits for the playback engine.
//!
//! The engine owns no I/O of its own: it drives an [`AudioDevice`], asks a
//! [`StreamResolver`] for URLs, records plays through a [`Library`] and
//! publishes metadata to a [`NowPlaying`] sink. Production code plugs in
//! the cpal output, the cached [`MusicApi`], SQLite play history and the OS
//! media controls; tests substitute the mocks below.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, Artwork, MusicApi};
use crate::model::{Quality, Track};

/// Notifications from the audio device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Playback position, in seconds
    TimeUpdate(f64),
    /// The source played to the end
    Ended,
    /// The device paused on its own (e.g. output lost)
    Paused,
}

/// Audio device errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to load source: {0}")]
    Load(String),

    #[error("source not ready after {0:?}")]
    Timeout(Duration),

    #[error("audio output error: {0}")]
    Output(String),

    #[error("audio device closed")]
    Closed,

    /// A later load replaced this one before it finished
    #[error("load superseded by a newer source")]
    Superseded,
}

/// A single audio output the engine feeds URLs to.
///
/// Control calls are fire-and-forget; only loading and starting can fail.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Replace the current source and wait until it is ready to play.
    /// Returns the source duration in seconds.
    ///
    /// If another `load` is issued before this one finishes, this one
    /// fails with [`DeviceError::Superseded`] and leaves the source alone.
    async fn load(&self, url: &str) -> Result<f64, DeviceError>;

    /// Start or resume playback.
    async fn play(&self) -> Result<(), DeviceError>;

    fn pause(&self);

    /// Drop the current source.
    fn stop(&self);

    /// Jump to `seconds` into the source.
    fn seek(&self, seconds: f64);

    /// Output gain in 0.0 - 1.0.
    fn set_volume(&self, volume: f64);
}

/// Stream resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No playable representation at this tier
    #[error("track {track_id} unavailable at {quality}")]
    Unavailable { track_id: u64, quality: Quality },

    #[error("lookup failed: {0}")]
    Lookup(#[source] ApiError),
}

impl From<ApiError> for ResolveError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unavailable { track_id, quality } => {
                ResolveError::Unavailable { track_id, quality }
            }
            other => ResolveError::Lookup(other),
        }
    }
}

/// Turns track IDs into playable URLs and track metadata.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// A directly playable URL for `track_id` at `quality`.
    async fn resolve(&self, track_id: u64, quality: Quality) -> Result<String, ResolveError>;

    /// Full track metadata, used when rebuilding a restored queue.
    async fn lookup_track(&self, track_id: u64) -> Result<Track, ResolveError>;
}

/// Play history sink.
#[async_trait]
pub trait Library: Send + Sync {
    async fn record_play(&self, track: &Track) -> Result<(), sqlx::Error>;
}

/// Metadata published to the OS media session.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: Option<Duration>,
    pub artwork: Vec<Artwork>,
}

impl NowPlayingInfo {
    pub fn from_track(track: &Track) -> Self {
        Self {
            title: track.display_title(),
            artist: track.artist_names(),
            album: track.album.title.clone(),
            duration: (track.duration > 0).then(|| Duration::from_secs(track.duration.into())),
            artwork: crate::api::artwork_set(track.album.cover.as_deref()),
        }
    }
}

/// Now-playing sink.
pub trait NowPlaying: Send + Sync {
    fn publish(&self, info: &NowPlayingInfo);

    /// Reflect transport state (playing/paused) in the media session.
    fn set_playing(&self, playing: bool);
}

// Implement traits for real collaborators

#[async_trait]
impl StreamResolver for MusicApi {
    async fn resolve(&self, track_id: u64, quality: Quality) -> Result<String, ResolveError> {
        // Stream loads are superseded, never cancelled
        Ok(self
            .stream_url(track_id, quality, &CancellationToken::new())
            .await?)
    }

    async fn lookup_track(&self, track_id: u64) -> Result<Track, ResolveError> {
        Ok(self.track(track_id, &CancellationToken::new()).await?)
    }
}

/// Play history stored in the `play_history` table.
#[derive(Clone)]
pub struct SqliteLibrary {
    pool: SqlitePool,
}

impl SqliteLibrary {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Library for SqliteLibrary {
    async fn record_play(&self, track: &Track) -> Result<(), sqlx::Error> {
        crate::db::record_play(&self.pool, track).await.map(|_| ())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_track, temp_db};

    #[test]
    fn test_now_playing_info_from_track() {
        let mut track = mock_track(1);
        track.album.cover = Some("aa-bb".to_string());
        let info = NowPlayingInfo::from_track(&track);
        assert_eq!(info.title, track.title);
        assert_eq!(info.artwork.len(), 4);
        assert_eq!(info.duration, Some(Duration::from_secs(track.duration.into())));
    }

    #[test]
    fn test_unavailable_maps_through() {
        let err: ResolveError = ApiError::Unavailable {
            track_id: 3,
            quality: Quality::High,
        }
        .into();
        assert!(matches!(err, ResolveError::Unavailable { track_id: 3, .. }));

        let err: ResolveError = ApiError::Parse("bad".to_string()).into();
        assert!(matches!(err, ResolveError::Lookup(_)));
    }

    #[tokio::test]
    async fn test_sqlite_library_records_history() {
        let (pool, _dir) = temp_db().await;
        let library = SqliteLibrary::new(pool.clone());
        library.record_play(&mock_track(42)).await.unwrap();

        let plays = crate::db::recent_plays(&pool, 10).await.unwrap();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].track_id, 42);
    }
}
