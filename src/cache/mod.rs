//! Two-tier response cache.
//!
//! Memoizes idempotent catalog lookups (search, album/artist/playlist
//! detail, stream manifests) so repeated navigation does not re-issue the
//! same network calls.
//!
//! # Tiers
//!
//! 1. **Memory** - bounded, FIFO eviction ([`MemoryTier`])
//! 2. **Durable** - the `response_cache` SQLite table ([`DurableStore`])
//!
//! Reads check memory first, then durable storage, promoting durable hits
//! into memory. Writes go through both tiers. Durable failures are logged
//! and swallowed, so a sandboxed environment degrades to memory-only.
//!
//! An entry is valid while `now - timestamp < ttl`. Staleness is found
//! lazily on read and by the periodic sweep ([`ResponseCache::spawn_sweeper`]).

mod memory;
mod store;

pub use memory::MemoryTier;
pub use store::DurableStore;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::events::{Listeners, Subscription};

/// Default time-to-live for every entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default memory-tier capacity.
pub const DEFAULT_CAPACITY: usize = 200;

/// Lookup category; the first half of every cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    SearchTracks,
    SearchAlbums,
    SearchArtists,
    SearchPlaylists,
    Track,
    Album,
    Artist,
    Playlist,
    Stream,
}

impl CacheKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheKind::SearchTracks => "search_tracks",
            CacheKind::SearchAlbums => "search_albums",
            CacheKind::SearchArtists => "search_artists",
            CacheKind::SearchPlaylists => "search_playlists",
            CacheKind::Track => "track",
            CacheKind::Album => "album",
            CacheKind::Artist => "artist",
            CacheKind::Playlist => "playlist",
            CacheKind::Stream => "stream",
        }
    }
}

/// Compose the opaque key for `(kind, params)`.
pub fn cache_key(kind: CacheKind, params: &str) -> String {
    format!("{}:{}", kind.as_str(), params)
}

/// One cached payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub data: serde_json::Value,
    /// Epoch milliseconds of the write
    pub timestamp: i64,
}

/// Notifications published by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A value was written
    Stored { key: String },
    /// A stale entry was dropped on read
    Expired { key: String },
    /// The periodic sweep removed entries
    Swept { removed: usize },
    /// Everything was flushed
    Cleared,
}

/// Wall-clock source for entry timestamps.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Cache errors surfaced by [`ResponseCache::get_or_fetch`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Two-tier memoizing cache.
pub struct ResponseCache {
    memory: Mutex<MemoryTier>,
    durable: Option<DurableStore>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    listeners: Listeners<CacheEvent>,
}

impl ResponseCache {
    /// Create a cache. Pass `None` for `durable` to run memory-only.
    pub fn new(
        durable: Option<DurableStore>,
        capacity: usize,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(capacity)),
            durable,
            ttl,
            clock,
            listeners: Listeners::new(),
        }
    }

    /// Memory-only cache with default TTL and capacity.
    pub fn in_memory() -> Self {
        Self::new(None, DEFAULT_CAPACITY, DEFAULT_TTL, Arc::new(SystemClock))
    }

    /// Entries currently held in memory.
    pub fn len(&self) -> usize {
        self.memory.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a durable tier is attached.
    pub fn is_persistent(&self) -> bool {
        self.durable.is_some()
    }

    /// Listen for cache transitions.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn is_fresh(&self, entry: &CacheEntry, now: i64) -> bool {
        now.saturating_sub(entry.timestamp) < self.ttl_millis()
    }

    /// Look up a value. Expired entries count as misses and are deleted.
    pub async fn get(&self, kind: CacheKind, params: &str) -> Option<serde_json::Value> {
        let key = cache_key(kind, params);
        let now = self.clock.now_millis();

        let expired_in_memory = {
            let mut memory = self.memory.lock();
            match memory.get(&key) {
                Some(entry) if self.is_fresh(entry, now) => return Some(entry.data.clone()),
                Some(_) => {
                    memory.remove(&key);
                    true
                }
                None => false,
            }
        };
        if expired_in_memory {
            debug!(target: "cache", %key, "Memory entry expired");
        }

        let durable = self.durable.as_ref()?;
        let entry = match durable.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                if expired_in_memory {
                    self.listeners.emit(&CacheEvent::Expired { key });
                }
                return None;
            }
            Err(e) => {
                debug!(target: "cache", %key, error = %e, "Durable read failed");
                return None;
            }
        };

        if !self.is_fresh(&entry, now) {
            if let Err(e) = durable.delete(&key).await {
                debug!(target: "cache", %key, error = %e, "Durable delete failed");
            }
            self.listeners.emit(&CacheEvent::Expired { key });
            return None;
        }

        let data = entry.data.clone();
        self.memory.lock().insert(entry);
        debug!(target: "cache", %key, "Promoted durable entry");
        Some(data)
    }

    /// Write a value through both tiers.
    pub async fn set(&self, kind: CacheKind, params: &str, value: serde_json::Value) {
        let entry = CacheEntry {
            key: cache_key(kind, params),
            data: value,
            timestamp: self.clock.now_millis(),
        };

        if let Some(evicted) = self.memory.lock().insert(entry.clone()) {
            debug!(target: "cache", key = %evicted, "Evicted oldest entry");
        }

        if let Some(durable) = &self.durable
            && let Err(e) = durable.put(&entry).await
        {
            debug!(target: "cache", key = %entry.key, error = %e, "Durable write failed");
        }

        self.listeners.emit(&CacheEvent::Stored { key: entry.key });
    }

    /// Return the cached value for `(kind, params)` or run `fetch`, cache
    /// its result and return it. Fetch errors are passed through uncached.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        kind: CacheKind,
        params: &str,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(kind, params).await {
            match serde_json::from_value::<T>(value) {
                Ok(hit) => return Ok(hit),
                Err(e) => {
                    debug!(target: "cache", kind = kind.as_str(), params, error = %e, "Cached value has wrong shape");
                }
            }
        }

        let fresh = fetch().await?;
        let value = serde_json::to_value(&fresh).map_err(|source| CacheError::Encode {
            key: cache_key(kind, params),
            source,
        })?;
        self.set(kind, params, value).await;
        Ok(fresh)
    }

    /// Remove every expired entry from both tiers. Returns entries removed
    /// from memory plus rows removed from storage.
    pub async fn clear_expired(&self) -> usize {
        let cutoff = self.clock.now_millis().saturating_sub(self.ttl_millis());

        let mut removed = self.memory.lock().remove_older_than(cutoff).len();

        if let Some(durable) = &self.durable {
            match durable.delete_older_than(cutoff).await {
                Ok(n) => removed += n as usize,
                Err(e) => debug!(target: "cache", error = %e, "Durable sweep failed"),
            }
        }

        if removed > 0 {
            debug!(target: "cache", removed, "Swept expired entries");
            self.listeners.emit(&CacheEvent::Swept { removed });
        }
        removed
    }

    /// Flush both tiers.
    pub async fn clear(&self) {
        self.memory.lock().clear();
        if let Some(durable) = &self.durable
            && let Err(e) = durable.clear().await
        {
            debug!(target: "cache", error = %e, "Durable clear failed");
        }
        info!(target: "cache", "Cache cleared");
        self.listeners.emit(&CacheEvent::Cleared);
    }

    /// Run [`clear_expired`](Self::clear_expired) every `interval` until the
    /// cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                cache.clear_expired().await;
            }
        })
    }
}

/// Clocks for tests.
#[cfg(test)]
pub mod mocks {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    /// A clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock(AtomicI64);

    impl ManualClock {
        pub fn new(start_millis: i64) -> Self {
            Self(AtomicI64::new(start_millis))
        }

        pub fn advance(&self, by: Duration) {
            self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::ManualClock;
    use super::*;
    use crate::test_utils::temp_db;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    async fn durable_cache(capacity: usize) -> (Arc<ResponseCache>, Arc<ManualClock>, DurableStore, tempfile::TempDir) {
        let (pool, dir) = temp_db().await;
        let store = DurableStore::new(pool);
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = Arc::new(ResponseCache::new(
            Some(store.clone()),
            capacity,
            TTL,
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        (cache, clock, store, dir)
    }

    #[test]
    fn test_cache_key_includes_kind() {
        assert_eq!(cache_key(CacheKind::Album, "42"), "album:42");
        assert_ne!(
            cache_key(CacheKind::SearchTracks, "x"),
            cache_key(CacheKind::SearchAlbums, "x")
        );
    }

    #[tokio::test]
    async fn test_closed_durable_tier_degrades_to_memory() {
        let (pool, _dir) = temp_db().await;
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = ResponseCache::new(
            Some(DurableStore::new(pool.clone())),
            10,
            TTL,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        pool.close().await;

        cache.set(CacheKind::Album, "7", json!({"title": "Discovery"})).await;
        assert_eq!(
            cache.get(CacheKind::Album, "7").await,
            Some(json!({"title": "Discovery"}))
        );
        assert_eq!(cache.get(CacheKind::Album, "8").await, None);

        let fetched: Result<u32, CacheError> = cache
            .get_or_fetch(CacheKind::Track, "1", || async { Ok(5) })
            .await;
        assert_eq!(fetched.unwrap(), 5);
        assert_eq!(cache.len(), 2);

        clock.advance(TTL);
        assert_eq!(cache.clear_expired().await, 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (cache, _clock, _store, _dir) = durable_cache(10).await;
        cache.set(CacheKind::SearchTracks, "daft punk", json!([1, 2, 3])).await;
        assert_eq!(
            cache.get(CacheKind::SearchTracks, "daft punk").await,
            Some(json!([1, 2, 3]))
        );
        assert_eq!(cache.get(CacheKind::SearchAlbums, "daft punk").await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_gone_from_both_tiers() {
        let (cache, clock, store, _dir) = durable_cache(10).await;
        cache.set(CacheKind::Album, "7", json!({"title": "Discovery"})).await;
        assert_eq!(store.count().await.unwrap(), 1);

        clock.advance(TTL);
        assert_eq!(cache.get(CacheKind::Album, "7").await, None);
        assert!(cache.is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_durable_hit_is_promoted() {
        let (cache, clock, store, _dir) = durable_cache(10).await;
        store
            .put(&CacheEntry {
                key: cache_key(CacheKind::Artist, "9"),
                data: json!("artist"),
                timestamp: clock.now_millis(),
            })
            .await
            .unwrap();
        assert!(cache.is_empty());

        assert_eq!(cache.get(CacheKind::Artist, "9").await, Some(json!("artist")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_capacity_evicts_oldest() {
        let (cache, _clock, _store, _dir) = durable_cache(2).await;
        cache.set(CacheKind::Track, "1", json!(1)).await;
        cache.set(CacheKind::Track, "2", json!(2)).await;
        cache.set(CacheKind::Track, "3", json!(3)).await;
        assert_eq!(cache.len(), 2);

        let keys: Vec<String> = cache.memory.lock().keys().map(str::to_string).collect();
        assert_eq!(keys, vec!["track:2".to_string(), "track:3".to_string()]);

        // Still served (and promoted) from durable storage
        assert_eq!(cache.get(CacheKind::Track, "1").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_clear_expired_sweeps_both_tiers() {
        let (cache, clock, store, _dir) = durable_cache(10).await;
        cache.set(CacheKind::Track, "old", json!("old")).await;
        clock.advance(Duration::from_secs(30));
        cache.set(CacheKind::Track, "new", json!("new")).await;
        clock.advance(Duration::from_secs(30));

        let removed = cache.clear_expired().await;
        assert_eq!(removed, 2); // one from memory, one row
        assert_eq!(cache.len(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(cache.get(CacheKind::Track, "new").await, Some(json!("new")));
    }

    #[tokio::test]
    async fn test_clear_flushes_and_notifies() {
        let (cache, _clock, store, _dir) = durable_cache(10).await;
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = cache.subscribe(move |e| sink.lock().push(e.clone()));

        cache.set(CacheKind::Playlist, "p", json!([])).await;
        cache.clear().await;

        assert!(cache.is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(
            *events.lock(),
            vec![
                CacheEvent::Stored { key: "playlist:p".to_string() },
                CacheEvent::Cleared
            ]
        );
    }

    #[tokio::test]
    async fn test_memory_only_mode() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ResponseCache::new(None, 4, TTL, Arc::clone(&clock) as Arc<dyn Clock>);
        assert!(!cache.is_persistent());

        cache.set(CacheKind::Stream, "1:LOSSLESS", json!("https://cdn.test/a.flac")).await;
        assert!(cache.get(CacheKind::Stream, "1:LOSSLESS").await.is_some());
        clock.advance(TTL + Duration::from_millis(1));
        assert!(cache.get(CacheKind::Stream, "1:LOSSLESS").await.is_none());
    }

    #[derive(Debug, thiserror::Error)]
    enum FetchError {
        #[error("upstream failed")]
        Upstream,
        #[error(transparent)]
        Cache(#[from] CacheError),
    }

    #[tokio::test]
    async fn test_get_or_fetch_memoizes_success_only() {
        let cache = ResponseCache::in_memory();
        let calls = std::sync::atomic::AtomicUsize::new(0);

        for _ in 0..3 {
            let v: Result<Vec<u32>, FetchError> = cache
                .get_or_fetch(CacheKind::SearchTracks, "q", || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(vec![1, 2])
                })
                .await;
            assert_eq!(v.unwrap(), vec![1, 2]);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let err: Result<Vec<u32>, FetchError> = cache
            .get_or_fetch(CacheKind::SearchTracks, "bad", || async { Err(FetchError::Upstream) })
            .await;
        assert!(err.is_err());
        assert!(cache.get(CacheKind::SearchTracks, "bad").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_interval() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(ResponseCache::new(
            None,
            4,
            TTL,
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        cache.set(CacheKind::Track, "1", json!(1)).await;
        clock.advance(TTL * 2);

        let handle = cache.spawn_sweeper(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.is_empty());
        handle.abort();
    }
}
