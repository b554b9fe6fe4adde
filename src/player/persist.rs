//! Playback snapshot persistence.
//!
//! The engine writes a small JSON snapshot to the `kv_store` table so the
//! next start can restore volume, quality and repeat mode, and offer to
//! resume where the user left off. Snapshots carry a version; anything that
//! isn't the current version is discarded wholesale.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use super::queue::PlayQueue;
use super::state::{PlaybackState, RepeatMode};
use crate::model::Quality;

/// Key under which the snapshot is stored.
pub const SNAPSHOT_KEY: &str = "playback_state";

/// Current snapshot layout.
pub const SNAPSHOT_VERSION: u32 = 2;

/// Most queue entries kept in a snapshot.
pub const MAX_SNAPSHOT_QUEUE: usize = 200;

/// Persisted playback state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub current_track_id: Option<u64>,
    pub queue_track_ids: Vec<u64>,
    pub current_index: usize,
    /// Seconds into the current track
    pub current_time: f64,
    pub volume: f64,
    pub is_muted: bool,
    pub quality: Quality,
    pub repeat_mode: RepeatMode,
}

impl Snapshot {
    /// Capture the engine state.
    ///
    /// Queues longer than [`MAX_SNAPSHOT_QUEUE`] are cut to a window around
    /// the current track, with the index rebased into it.
    pub fn capture(state: &PlaybackState, queue: &PlayQueue) -> Self {
        let ids = queue.track_ids();
        let (queue_track_ids, current_index) = window(&ids, queue.index());

        Self {
            version: SNAPSHOT_VERSION,
            current_track_id: state.current_track.as_ref().map(|t| t.id),
            queue_track_ids,
            current_index,
            current_time: if state.elapsed.is_finite() { state.elapsed.max(0.0) } else { 0.0 },
            volume: state.volume,
            is_muted: state.muted,
            quality: state.quality,
            repeat_mode: state.repeat,
        }
    }

    /// Parse a stored snapshot. Unknown versions and garbage give `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        let version = value.get("version").and_then(|v| v.as_u64());
        if version != Some(u64::from(SNAPSHOT_VERSION)) {
            debug!(target: "player", ?version, "Discarding snapshot with unsupported version");
            return None;
        }
        match serde_json::from_value(value) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!(target: "player", error = %e, "Discarding malformed snapshot");
                None
            }
        }
    }

    pub fn encode(&self) -> String {
        // Plain data; serializing cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Whether there is anything to resume.
    pub fn has_queue(&self) -> bool {
        !self.queue_track_ids.is_empty()
    }
}

fn window(ids: &[u64], index: usize) -> (Vec<u64>, usize) {
    if ids.len() <= MAX_SNAPSHOT_QUEUE {
        return (ids.to_vec(), index.min(ids.len().saturating_sub(1)));
    }
    let start = index
        .saturating_sub(MAX_SNAPSHOT_QUEUE / 2)
        .min(ids.len() - MAX_SNAPSHOT_QUEUE);
    (
        ids[start..start + MAX_SNAPSHOT_QUEUE].to_vec(),
        index - start,
    )
}

/// Durable home for the raw snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> sqlx::Result<Option<String>>;
    async fn save(&self, raw: &str) -> sqlx::Result<()>;
}

/// Snapshot stored under [`SNAPSHOT_KEY`] in `kv_store`.
#[derive(Clone)]
pub struct KvSnapshotStore {
    pool: SqlitePool,
}

impl KvSnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for KvSnapshotStore {
    async fn load(&self) -> sqlx::Result<Option<String>> {
        crate::db::kv_get(&self.pool, SNAPSHOT_KEY).await
    }

    async fn save(&self, raw: &str) -> sqlx::Result<()> {
        crate::db::kv_set(&self.pool, SNAPSHOT_KEY, raw).await
    }
}
