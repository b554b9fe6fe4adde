//! The playback engine.
//!
//! [`PlaybackEngine`] is the single authority over "now playing". It owns
//! the queue, drives the [`AudioDevice`], resolves stream URLs and keeps a
//! debounced snapshot of itself in durable storage.
//!
//! # Concurrency
//!
//! All operations take `&self`. Mutable state lives behind one mutex that
//! is never held across an `.await`, so controls like [`seek`] and
//! [`set_volume`] stay responsive while a load is resolving.
//!
//! Every load takes a fresh token from a monotonically increasing counter
//! and re-checks it after each suspension point. A load whose token is no
//! longer current stops without touching the device: the most recent
//! request always wins.
//!
//! [`seek`]: PlaybackEngine::seek
//! [`set_volume`]: PlaybackEngine::set_volume

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::persist::{Snapshot, SnapshotStore};
use super::queue::{Advance, PlayQueue};
use super::state::{PlaybackState, RepeatMode, ResolveState, TransportStatus};
use super::traits::{
    AudioDevice, DeviceError, DeviceEvent, Library, NowPlaying, NowPlayingInfo, StreamResolver,
};
use crate::events::{Listeners, Subscription};
use crate::model::{Quality, Track};

/// Resume offsets stop this far before the end of the source.
const RESUME_EPSILON: f64 = 0.5;

/// `previous` restarts the current track past this point.
const RESTART_THRESHOLD: f64 = 3.0;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Desired stream tier at startup
    pub quality: Quality,
    /// Volume restored when un-muting from zero
    pub default_volume: f64,
    /// Longest wait for the device to accept a source
    pub load_timeout: Duration,
    /// Debounce tick for snapshot writes
    pub flush_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            default_volume: 1.0,
            load_timeout: Duration::from_secs(20),
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Why a load attempt stopped.
#[derive(Debug)]
enum LoadOutcome {
    Playing,
    Superseded,
    Failed(String),
}

struct Inner {
    state: PlaybackState,
    queue: PlayQueue,
    /// URL currently loaded in the device
    url: Option<String>,
    /// Last non-zero volume, restored on un-mute
    last_volume: Option<f64>,
    /// Restored queue waiting for the next play action
    pending_resume: Option<Snapshot>,
}

/// Queue-driven playback state machine.
pub struct PlaybackEngine {
    device: Arc<dyn AudioDevice>,
    resolver: Arc<dyn StreamResolver>,
    library: Arc<dyn Library>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    now_playing: Option<Arc<dyn NowPlaying>>,
    settings: EngineSettings,
    inner: Mutex<Inner>,
    load_token: AtomicU64,
    dirty: AtomicBool,
    listeners: Listeners<PlaybackState>,
    shutdown: CancellationToken,
}

/// What `toggle_play_pause` decided to do.
enum Toggle {
    Pause,
    Resume,
    Reload(Track, f64),
    Restore(Snapshot),
    Nothing,
}

impl PlaybackEngine {
    pub fn new(
        device: Arc<dyn AudioDevice>,
        resolver: Arc<dyn StreamResolver>,
        library: Arc<dyn Library>,
        settings: EngineSettings,
    ) -> Self {
        let state = PlaybackState {
            quality: settings.quality,
            volume: settings.default_volume.clamp(0.0, 1.0),
            ..Default::default()
        };
        Self {
            device,
            resolver,
            library,
            snapshots: None,
            now_playing: None,
            settings,
            inner: Mutex::new(Inner {
                state,
                queue: PlayQueue::new(),
                url: None,
                last_volume: None,
                pending_resume: None,
            }),
            load_token: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
            listeners: Listeners::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Persist snapshots to `store`.
    pub fn with_snapshots(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Publish now-playing metadata to `sink`.
    pub fn with_now_playing(mut self, sink: Arc<dyn NowPlaying>) -> Self {
        self.now_playing = Some(sink);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state.clone()
    }

    /// Tracks in playback order.
    pub fn queue(&self) -> Vec<Track> {
        self.inner.lock().queue.active().to_vec()
    }

    /// Whether a restored queue is waiting to be resumed.
    pub fn has_pending_resume(&self) -> bool {
        self.inner.lock().pending_resume.is_some()
    }

    /// Be told about every state transition.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PlaybackState) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let (result, snapshot) = {
            let mut inner = self.inner.lock();
            let result = f(&mut inner);
            (result, inner.state.clone())
        };
        self.listeners.emit(&snapshot);
        result
    }

    fn next_token(&self) -> u64 {
        self.load_token.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, token: u64) -> bool {
        self.load_token.load(Ordering::SeqCst) == token
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Apply the stored snapshot, if any.
    ///
    /// Volume, mute, quality and repeat take effect immediately. The queue
    /// is kept aside and only rebuilt by the next [`toggle_play_pause`].
    ///
    /// [`toggle_play_pause`]: Self::toggle_play_pause
    pub async fn restore(&self) {
        let Some(store) = &self.snapshots else { return };
        let raw = match store.load().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                debug!(target: "player", error = %e, "Snapshot read failed");
                return;
            }
        };
        let Some(snapshot) = Snapshot::decode(&raw) else { return };

        info!(
            target: "player",
            queued = snapshot.queue_track_ids.len(),
            index = snapshot.current_index,
            "Restored playback snapshot"
        );

        let volume = if snapshot.volume.is_finite() { snapshot.volume.clamp(0.0, 1.0) } else { 1.0 };
        let effective = self.update(|inner| {
            inner.state.volume = volume;
            inner.state.muted = snapshot.is_muted || volume == 0.0;
            inner.state.quality = snapshot.quality;
            inner.state.repeat = snapshot.repeat_mode;
            if volume > 0.0 {
                inner.last_volume = Some(volume);
            }
            if snapshot.has_queue() {
                inner.pending_resume = Some(snapshot);
            }
            inner.state.effective_volume()
        });
        self.device.set_volume(effective);
    }

    // ========================================================================
    // Play requests
    // ========================================================================

    /// Play `track`, replacing the queue with `queue` (or just `[track]`).
    pub async fn play_track(&self, track: Track, queue: Option<Vec<Track>>) {
        let tracks = queue.unwrap_or_else(|| vec![track.clone()]);
        let index = tracks.iter().position(|t| t.id == track.id).unwrap_or(0);
        self.update(|inner| {
            inner.queue.replace(tracks, index);
            inner.state.shuffle = false;
            inner.pending_resume = None;
        });
        self.load_track(track, 0.0).await;
    }

    /// Replace the queue with `tracks` and start at `start_index`.
    pub async fn play_queue(&self, tracks: Vec<Track>, start_index: usize) {
        if tracks.is_empty() {
            return;
        }
        let index = start_index.min(tracks.len() - 1);
        let track = tracks[index].clone();
        self.update(|inner| {
            inner.queue.replace(tracks, index);
            inner.state.shuffle = false;
            inner.pending_resume = None;
        });
        self.load_track(track, 0.0).await;
    }

    /// Append to the queue; starts playing if nothing is loaded.
    pub async fn add_to_queue(&self, tracks: Vec<Track>) {
        if tracks.is_empty() {
            return;
        }
        let start = self.update(|inner| {
            let first_new = inner.queue.len();
            let idle = inner.url.is_none() && inner.state.status != TransportStatus::Loading;
            inner.queue.append(tracks);
            if idle {
                inner.pending_resume = None;
                inner.queue.set_index(first_new);
                inner.state.current_index = inner.queue.index();
                inner.queue.current().cloned()
            } else {
                None
            }
        });
        self.mark_dirty();

        if let Some(track) = start {
            self.load_track(track, 0.0).await;
        }
    }

    /// Remove the track at active `index`. Never advances playback.
    pub fn remove_from_queue(&self, index: usize) {
        let removed = self.update(|inner| {
            let removed = inner.queue.remove(index);
            inner.state.current_index = inner.queue.index();
            removed
        });
        if let Some(track) = removed {
            debug!(target: "player", index, track_id = track.id, "Removed from queue");
            self.mark_dirty();
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Pause, resume, or bring back something to play.
    pub async fn toggle_play_pause(&self) {
        let action = {
            let mut inner = self.inner.lock();
            if inner.url.is_some() {
                match inner.state.status {
                    TransportStatus::Playing => Toggle::Pause,
                    TransportStatus::Loading => Toggle::Nothing,
                    TransportStatus::Paused | TransportStatus::Idle => Toggle::Resume,
                }
            } else if inner.state.status == TransportStatus::Loading {
                Toggle::Nothing
            } else if let Some(track) = inner.state.current_track.clone() {
                Toggle::Reload(track, inner.state.elapsed)
            } else if let Some(snapshot) = inner.pending_resume.take() {
                Toggle::Restore(snapshot)
            } else {
                Toggle::Nothing
            }
        };

        match action {
            Toggle::Pause => self.pause().await,
            Toggle::Resume => self.resume().await,
            Toggle::Reload(track, at) => {
                debug!(target: "player", track_id = track.id, at, "Nothing loaded, re-resolving");
                self.load_track(track, at).await;
            }
            Toggle::Restore(snapshot) => self.resume_snapshot(snapshot).await,
            Toggle::Nothing => {}
        }
    }

    async fn pause(&self) {
        self.device.pause();
        self.update(|inner| inner.state.status = TransportStatus::Paused);
        if let Some(sink) = &self.now_playing {
            sink.set_playing(false);
        }
        self.flush().await;
    }

    async fn resume(&self) {
        if let Err(e) = self.device.play().await {
            warn!(target: "player", error = %e, "Resume failed");
            return;
        }
        self.update(|inner| inner.state.status = TransportStatus::Playing);
        if let Some(sink) = &self.now_playing {
            sink.set_playing(true);
        }
    }

    pub async fn play_next(&self) {
        let advance = {
            let inner = self.inner.lock();
            inner.queue.next(inner.state.repeat)
        };
        self.advance(advance).await;
    }

    /// Go back a track, or restart this one past the first few seconds.
    pub async fn play_prev(&self) {
        let advance = {
            let inner = self.inner.lock();
            if inner.queue.is_empty() {
                return;
            }
            if inner.state.elapsed > RESTART_THRESHOLD {
                Advance::Restart
            } else {
                inner.queue.previous(inner.state.repeat)
            }
        };
        self.advance(advance).await;
    }

    async fn advance(&self, advance: Advance) {
        match advance {
            Advance::Restart => self.restart_current().await,
            Advance::Goto(index) => {
                let track = {
                    let mut inner = self.inner.lock();
                    inner.queue.set_index(index);
                    inner.queue.current().cloned()
                };
                if let Some(track) = track {
                    self.load_track(track, 0.0).await;
                }
            }
            Advance::Stop => self.stop_at_end().await,
        }
    }

    async fn restart_current(&self) {
        let (loaded, track) = {
            let inner = self.inner.lock();
            (inner.url.is_some(), inner.state.current_track.clone())
        };

        if !loaded {
            if let Some(track) = track {
                self.load_track(track, 0.0).await;
            }
            return;
        }

        // Anything still loading belongs to a different request now
        self.next_token();
        self.device.seek(0.0);
        self.update(|inner| inner.state.elapsed = 0.0);
        self.resume().await;
    }

    /// End of queue: pause at 0 and go idle, keeping the track visible.
    async fn stop_at_end(&self) {
        self.next_token();
        self.device.pause();
        self.device.seek(0.0);
        self.update(|inner| {
            inner.state.status = TransportStatus::Idle;
            inner.state.elapsed = 0.0;
        });
        if let Some(sink) = &self.now_playing {
            sink.set_playing(false);
        }
        info!(target: "player", "Reached end of queue");
        self.flush().await;
    }

    /// Jump to `seconds`, clamped to the track length.
    pub fn seek(&self, seconds: f64) {
        if !seconds.is_finite() {
            return;
        }
        let (target, loaded) = self.update(|inner| {
            let max = if inner.state.duration > 0.0 { inner.state.duration } else { f64::MAX };
            let target = seconds.clamp(0.0, max);
            inner.state.elapsed = target;
            (target, inner.url.is_some())
        });
        if loaded {
            self.device.seek(target);
        }
        self.mark_dirty();
    }

    // ========================================================================
    // Volume
    // ========================================================================

    /// Set volume in 0.0 - 1.0. Zero mutes.
    pub fn set_volume(&self, volume: f64) {
        if !volume.is_finite() {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        let effective = self.update(|inner| {
            inner.state.volume = volume;
            if volume == 0.0 {
                inner.state.muted = true;
            } else {
                inner.state.muted = false;
                inner.last_volume = Some(volume);
            }
            inner.state.effective_volume()
        });
        self.device.set_volume(effective);
        self.mark_dirty();
    }

    pub fn toggle_mute(&self) {
        let default = self.settings.default_volume.clamp(0.0, 1.0);
        let effective = self.update(|inner| {
            if inner.state.muted {
                inner.state.muted = false;
                if inner.state.volume <= 0.0 {
                    inner.state.volume = inner
                        .last_volume
                        .filter(|v| *v > 0.0)
                        .unwrap_or(if default > 0.0 { default } else { 1.0 });
                }
            } else {
                inner.state.muted = true;
            }
            inner.state.effective_volume()
        });
        self.device.set_volume(effective);
        self.mark_dirty();
    }

    // ========================================================================
    // Modes
    // ========================================================================

    pub fn toggle_shuffle(&self) {
        let shuffle = self.update(|inner| {
            let enable = !inner.queue.is_shuffled();
            inner.queue.set_shuffle(enable);
            inner.state.shuffle = enable;
            inner.state.current_index = inner.queue.index();
            enable
        });
        debug!(target: "player", shuffle, "Shuffle toggled");
        self.mark_dirty();
    }

    /// `off -> all -> one -> off`
    pub fn cycle_repeat(&self) -> RepeatMode {
        let mode = self.update(|inner| {
            inner.state.repeat = inner.state.repeat.cycle();
            inner.state.repeat
        });
        self.mark_dirty();
        mode
    }

    /// Desired tier for subsequent loads.
    pub fn set_quality(&self, quality: Quality) {
        self.update(|inner| inner.state.quality = quality);
        self.mark_dirty();
    }

    // ========================================================================
    // Loading
    // ========================================================================

    async fn load_track(&self, track: Track, offset: f64) {
        let token = self.next_token();
        let quality = self.inner.lock().state.quality;

        self.begin_load(token, &track, offset, quality);
        self.flush().await;
        if !self.is_current(token) {
            return;
        }

        if let Err(e) = self.library.record_play(&track).await {
            warn!(target: "player", track_id = track.id, error = %e, "Failed to record play");
        }
        if let Some(sink) = &self.now_playing {
            sink.publish(&NowPlayingInfo::from_track(&track));
        }

        let outcome = match self.attempt(token, &track, quality).await {
            LoadOutcome::Failed(reason) if quality.is_highest() => match quality.downgrade() {
                Some(lower) => {
                    warn!(
                        target: "player",
                        track_id = track.id,
                        %reason,
                        from = %quality,
                        to = %lower,
                        "Load failed, retrying at lower quality"
                    );
                    self.begin_load(token, &track, offset, lower);
                    self.attempt(token, &track, lower).await
                }
                None => LoadOutcome::Failed(reason),
            },
            other => other,
        };

        match outcome {
            LoadOutcome::Playing => {
                if let Some(sink) = &self.now_playing {
                    sink.set_playing(true);
                }
            }
            LoadOutcome::Superseded => {
                debug!(target: "player", track_id = track.id, "Load superseded");
            }
            LoadOutcome::Failed(reason) => {
                warn!(target: "player", track_id = track.id, %reason, "Playback failed");
                self.update(|inner| {
                    if self.is_current(token) {
                        inner.state.status = TransportStatus::Idle;
                        inner.state.resolve = ResolveState::Failed(reason);
                    }
                });
            }
        }
    }

    /// Step 1: mark loading with `track` as current.
    fn begin_load(&self, token: u64, track: &Track, offset: f64, quality: Quality) {
        self.update(|inner| {
            if !self.is_current(token) {
                return;
            }
            inner.url = None;
            inner.state.status = TransportStatus::Loading;
            inner.state.current_track = Some(track.clone());
            inner.state.current_index = inner.queue.index();
            inner.state.elapsed = offset.max(0.0);
            inner.state.duration = f64::from(track.duration);
            inner.state.resolve = ResolveState::Resolving(quality);
        });
    }

    /// Steps 3-6 at one quality tier.
    async fn attempt(&self, token: u64, track: &Track, quality: Quality) -> LoadOutcome {
        let url = match self.resolver.resolve(track.id, quality).await {
            Ok(url) => url,
            Err(e) => return self.failed(token, e.to_string()),
        };
        if !self.is_current(token) {
            return LoadOutcome::Superseded;
        }

        let loaded = tokio::time::timeout(self.settings.load_timeout, self.device.load(&url))
            .await
            .unwrap_or(Err(DeviceError::Timeout(self.settings.load_timeout)));
        if !self.is_current(token) {
            return LoadOutcome::Superseded;
        }
        let device_duration = match loaded {
            Ok(d) => d,
            Err(e) => return self.failed(token, e.to_string()),
        };

        let resume_at = {
            let mut inner = self.inner.lock();
            inner.url = Some(url);
            if device_duration > 0.0 {
                inner.state.duration = device_duration;
            }
            let offset = inner.state.elapsed;
            if offset > 0.0 {
                let clamped = offset.clamp(0.0, (inner.state.duration - RESUME_EPSILON).max(0.0));
                inner.state.elapsed = clamped;
                Some(clamped)
            } else {
                None
            }
        };
        if let Some(at) = resume_at {
            self.device.seek(at);
        }
        self.device.set_volume(self.inner.lock().state.effective_volume());

        if let Err(e) = self.device.play().await {
            return self.failed(token, e.to_string());
        }
        if !self.is_current(token) {
            return LoadOutcome::Superseded;
        }

        self.update(|inner| {
            inner.state.status = TransportStatus::Playing;
            inner.state.resolve = ResolveState::Ready(quality);
        });
        info!(target: "player", track_id = track.id, %quality, "Playing");
        LoadOutcome::Playing
    }

    fn failed(&self, token: u64, reason: String) -> LoadOutcome {
        if !self.is_current(token) {
            return LoadOutcome::Superseded;
        }
        self.update(|inner| {
            inner.url = None;
            inner.state.status = TransportStatus::Idle;
        });
        LoadOutcome::Failed(reason)
    }

    /// Rebuild a restored queue and continue where it left off.
    async fn resume_snapshot(&self, snapshot: Snapshot) {
        let lookups = snapshot
            .queue_track_ids
            .iter()
            .map(|&id| self.resolver.lookup_track(id));
        let results = join_all(lookups).await;

        let mut tracks = Vec::with_capacity(results.len());
        let mut index = None;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(track) => {
                    if i == snapshot.current_index
                        || (index.is_none() && Some(track.id) == snapshot.current_track_id)
                    {
                        index = Some(tracks.len());
                    }
                    tracks.push(track);
                }
                Err(e) => {
                    debug!(target: "player", track_id = snapshot.queue_track_ids[i], error = %e, "Dropping unresolvable queue entry");
                }
            }
        }

        if tracks.is_empty() {
            warn!(target: "player", "Nothing from the previous session could be restored");
            return;
        }

        let index = index.unwrap_or(0);
        let resumes_same = tracks.get(index).map(|t| t.id) == snapshot.current_track_id;
        let offset = if resumes_same { snapshot.current_time } else { 0.0 };
        let track = tracks[index].clone();

        info!(target: "player", track_id = track.id, offset, "Resuming previous session");
        self.update(|inner| {
            inner.queue.replace(tracks, index);
            inner.state.shuffle = false;
        });
        self.load_track(track, offset).await;
    }

    // ========================================================================
    // Device events
    // ========================================================================

    pub async fn handle_device_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::TimeUpdate(seconds) if seconds.is_finite() => {
                let active = {
                    let mut inner = self.inner.lock();
                    let active = matches!(
                        inner.state.status,
                        TransportStatus::Playing | TransportStatus::Paused
                    );
                    if active {
                        inner.state.elapsed = seconds.max(0.0);
                    }
                    active
                };
                if active {
                    self.mark_dirty();
                }
            }
            DeviceEvent::TimeUpdate(_) => {}
            DeviceEvent::Ended => {
                if self.state().status == TransportStatus::Playing {
                    self.play_next().await;
                }
            }
            DeviceEvent::Paused => {
                if self.state().status == TransportStatus::Playing {
                    self.update(|inner| inner.state.status = TransportStatus::Paused);
                    if let Some(sink) = &self.now_playing {
                        sink.set_playing(false);
                    }
                    self.flush().await;
                }
            }
        }
    }

    /// Feed device events into the engine until the channel closes or the
    /// engine shuts down.
    pub async fn run_device_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<DeviceEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_device_event(event).await,
                    None => break,
                },
            }
        }
        debug!(target: "player", "Device event pump stopped");
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn capture(&self) -> Snapshot {
        let inner = self.inner.lock();
        let mut snapshot = Snapshot::capture(&inner.state, &inner.queue);
        // Keep an unresumed session alive across restarts
        if let Some(pending) = &inner.pending_resume
            && inner.queue.is_empty()
        {
            snapshot.current_track_id = pending.current_track_id;
            snapshot.queue_track_ids = pending.queue_track_ids.clone();
            snapshot.current_index = pending.current_index;
            snapshot.current_time = pending.current_time;
        }
        snapshot
    }

    /// Write the snapshot now.
    pub async fn flush(&self) {
        self.dirty.store(false, Ordering::SeqCst);
        let Some(store) = &self.snapshots else { return };
        let raw = self.capture().encode();
        if let Err(e) = store.save(&raw).await {
            debug!(target: "player", error = %e, "Snapshot write failed");
        }
    }

    /// Write the snapshot if anything changed since the last write.
    pub async fn flush_if_dirty(&self) {
        if self.dirty.load(Ordering::SeqCst) {
            self.flush().await;
        }
    }

    /// Debounce loop: writes at most once per tick.
    pub async fn run_persistence(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.flush_if_dirty().await,
            }
        }
    }

    /// Flush state and release the device.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.next_token();
        self.flush().await;
        self.device.stop();
        info!(target: "player", "Playback engine stopped");
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::persist::mocks::MemorySnapshotStore;
    use crate::player::traits::mocks::{
        DeviceCall, MockDevice, MockLibrary, MockNowPlaying, MockResolver, mock_url,
    };
    use crate::test_utils::mock_track;

    struct Harness {
        engine: Arc<PlaybackEngine>,
        device: Arc<MockDevice>,
        resolver: Arc<MockResolver>,
        library: Arc<MockLibrary>,
        store: Arc<MemorySnapshotStore>,
        now_playing: Arc<MockNowPlaying>,
    }

    fn harness_with(store: MemorySnapshotStore, resolver: MockResolver) -> Harness {
        harness_on(MockDevice::new(), store, resolver)
    }

    fn harness_on(device: MockDevice, store: MemorySnapshotStore, resolver: MockResolver) -> Harness {
        let device = Arc::new(device);
        let resolver = Arc::new(resolver);
        let library = Arc::new(MockLibrary::default());
        let store = Arc::new(store);
        let now_playing = Arc::new(MockNowPlaying::default());
        let engine = PlaybackEngine::new(
            device.clone(),
            resolver.clone(),
            library.clone(),
            EngineSettings::default(),
        )
        .with_snapshots(store.clone())
        .with_now_playing(now_playing.clone());
        Harness {
            engine: Arc::new(engine),
            device,
            resolver,
            library,
            store,
            now_playing,
        }
    }

    fn harness() -> Harness {
        harness_with(MemorySnapshotStore::default(), MockResolver::new())
    }

    fn tracks(ids: std::ops::RangeInclusive<u64>) -> Vec<Track> {
        ids.map(mock_track).collect()
    }

    fn url(id: u64) -> String {
        mock_url(id, Quality::Lossless)
    }

    #[tokio::test]
    async fn test_play_track_runs_load_protocol() {
        let h = harness();
        h.engine.play_track(mock_track(1), None).await;

        let state = h.engine.state();
        assert_eq!(state.status, TransportStatus::Playing);
        assert_eq!(state.current_track.as_ref().map(|t| t.id), Some(1));
        assert_eq!(state.resolve, ResolveState::Ready(Quality::Lossless));
        assert_eq!(state.duration, 200.0);
        assert_eq!(h.device.source(), Some(url(1)));
        assert!(h.device.is_playing());
        assert_eq!(*h.library.played.lock(), vec![1]);
        assert_eq!(h.now_playing.published.lock().len(), 1);
        assert_eq!(*h.now_playing.playing.lock(), Some(true));
        assert_eq!(h.engine.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_play_track_indexes_into_supplied_queue() {
        let h = harness();
        let queue = tracks(1..=4);
        h.engine.play_track(mock_track(3), Some(queue)).await;
        assert_eq!(h.engine.state().current_index, 2);

        h.engine.play_track(mock_track(9), Some(tracks(1..=2))).await;
        let state = h.engine.state();
        assert_eq!(state.current_index, 0);
        assert_eq!(state.current_track.unwrap().id, 9);
    }

    #[tokio::test]
    async fn test_play_queue_clamps_and_ignores_empty() {
        let h = harness();
        h.engine.play_queue(Vec::new(), 0).await;
        assert!(h.device.loads().is_empty());

        h.engine.play_queue(tracks(1..=3), 99).await;
        assert_eq!(h.engine.state().current_index, 2);
        assert_eq!(h.device.source(), Some(url(3)));
    }

    #[tokio::test]
    async fn test_latest_play_request_wins() {
        let h = harness();
        h.device.gate_url(&url(2));

        let first = {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move { engine.play_queue(tracks(1..=3), 1).await })
        };
        // Let the first request reach the device
        while h.device.loads().is_empty() {
            tokio::task::yield_now().await;
        }

        h.engine.play_queue(tracks(10..=12), 0).await;
        h.device.release();
        first.await.unwrap();

        assert_eq!(h.device.source(), Some(url(10)));
        assert!(h.device.is_playing());
        let state = h.engine.state();
        assert_eq!(state.current_track.unwrap().id, 10);
        assert_eq!(state.status, TransportStatus::Playing);
        // The superseded load never started playback
        let plays = h.device.calls().iter().filter(|c| **c == DeviceCall::Play).count();
        assert_eq!(plays, 1);
    }

    #[tokio::test]
    async fn test_slow_stale_load_leaves_newer_source_playing() {
        let h = harness_on(
            MockDevice::deferred(),
            MemorySnapshotStore::default(),
            MockResolver::new(),
        );
        h.device.gate_url(&url(2));

        let first = {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move { engine.play_queue(tracks(1..=3), 1).await })
        };
        while h.device.loads().is_empty() {
            tokio::task::yield_now().await;
        }

        h.engine.play_queue(tracks(10..=12), 0).await;
        assert_eq!(h.device.source(), Some(url(10)));

        // The older download finishes last
        h.device.release();
        first.await.unwrap();

        assert_eq!(h.device.source(), Some(url(10)));
        assert!(h.device.is_playing());
        let state = h.engine.state();
        assert_eq!(state.current_track.unwrap().id, 10);
        assert_eq!(state.status, TransportStatus::Playing);
        assert_eq!(state.resolve, ResolveState::Ready(Quality::Lossless));
    }

    #[tokio::test]
    async fn test_snapshot_write_failures_do_not_interrupt_playback() {
        let h = harness_with(MemorySnapshotStore::broken(), MockResolver::new());

        h.engine.play_track(mock_track(1), None).await;
        h.engine.flush().await;

        assert_eq!(h.engine.state().status, TransportStatus::Playing);
        assert!(h.device.is_playing());
        assert!(*h.store.rejected.lock() >= 1);
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_next_at_end_without_repeat_stops() {
        let h = harness();
        h.engine.play_queue(tracks(1..=2), 1).await;
        h.engine.handle_device_event(DeviceEvent::TimeUpdate(120.0)).await;

        h.engine.play_next().await;

        let state = h.engine.state();
        assert_eq!(state.status, TransportStatus::Idle);
        assert_eq!(state.elapsed, 0.0);
        assert_eq!(state.current_track.unwrap().id, 2);
        assert!(!h.device.is_playing());
        assert_eq!(h.device.last_seek(), Some(0.0));
    }

    #[tokio::test]
    async fn test_next_at_end_with_repeat_all_wraps() {
        let h = harness();
        h.engine.play_queue(tracks(1..=3), 2).await;
        assert_eq!(h.engine.cycle_repeat(), RepeatMode::All);

        h.engine.play_next().await;
        let state = h.engine.state();
        assert_eq!(state.current_index, 0);
        assert_eq!(h.device.source(), Some(url(1)));
    }

    #[tokio::test]
    async fn test_repeat_one_restarts_in_place() {
        let h = harness();
        h.engine.play_queue(tracks(1..=3), 1).await;
        h.engine.cycle_repeat();
        h.engine.cycle_repeat();
        h.engine.handle_device_event(DeviceEvent::TimeUpdate(50.0)).await;

        h.engine.handle_device_event(DeviceEvent::Ended).await;

        let state = h.engine.state();
        assert_eq!(state.current_index, 1);
        assert_eq!(state.elapsed, 0.0);
        assert_eq!(state.status, TransportStatus::Playing);
        assert_eq!(h.device.loads().len(), 1);
        assert_eq!(h.device.last_seek(), Some(0.0));
    }

    #[tokio::test]
    async fn test_ended_advances_queue() {
        let h = harness();
        h.engine.play_queue(tracks(1..=3), 0).await;
        h.engine.handle_device_event(DeviceEvent::Ended).await;
        assert_eq!(h.engine.state().current_index, 1);
        assert_eq!(h.device.source(), Some(url(2)));
    }

    #[tokio::test]
    async fn test_prev_restarts_after_three_seconds() {
        let h = harness();
        h.engine.play_queue(tracks(1..=3), 1).await;
        h.engine.handle_device_event(DeviceEvent::TimeUpdate(3.5)).await;

        h.engine.play_prev().await;
        let state = h.engine.state();
        assert_eq!(state.current_index, 1);
        assert_eq!(state.elapsed, 0.0);
        assert_eq!(h.device.loads().len(), 1);

        h.engine.handle_device_event(DeviceEvent::TimeUpdate(3.0)).await;
        h.engine.play_prev().await;
        assert_eq!(h.engine.state().current_index, 0);
    }

    #[tokio::test]
    async fn test_prev_at_start_respects_repeat() {
        let h = harness();
        h.engine.play_queue(tracks(1..=3), 0).await;
        h.engine.play_prev().await;
        assert_eq!(h.engine.state().current_index, 0);

        h.engine.cycle_repeat();
        h.engine.play_prev().await;
        assert_eq!(h.engine.state().current_index, 2);
    }

    #[tokio::test]
    async fn test_shuffle_twice_restores_order() {
        let h = harness();
        let original = tracks(1..=12);
        h.engine.play_queue(original.clone(), 5).await;

        h.engine.toggle_shuffle();
        let state = h.engine.state();
        assert!(state.shuffle);
        assert_eq!(state.current_index, 0);
        assert_eq!(h.engine.queue()[0].id, 6);

        h.engine.toggle_shuffle();
        assert_eq!(h.engine.queue(), original);
        let state = h.engine.state();
        assert!(!state.shuffle);
        assert_eq!(state.current_index, 5);
        assert_eq!(state.current_track.unwrap().id, 6);
    }

    #[tokio::test]
    async fn test_remove_from_queue_adjusts_index() {
        let h = harness();
        h.engine.play_queue(tracks(1..=4), 2).await;

        h.engine.remove_from_queue(0);
        assert_eq!(h.engine.state().current_index, 1);

        // Removing the current track neither advances nor reloads
        h.engine.remove_from_queue(1);
        let state = h.engine.state();
        assert_eq!(state.current_index, 1);
        assert_eq!(state.current_track.unwrap().id, 3);
        assert_eq!(h.device.loads().len(), 1);
        assert_eq!(h.engine.queue().len(), 2);
    }

    #[tokio::test]
    async fn test_add_to_queue_starts_when_idle() {
        let h = harness();
        h.engine.add_to_queue(tracks(1..=2)).await;
        assert_eq!(h.device.source(), Some(url(1)));

        h.engine.add_to_queue(tracks(3..=3)).await;
        assert_eq!(h.device.loads().len(), 1);
        assert_eq!(h.engine.queue().len(), 3);
    }

    #[tokio::test]
    async fn test_volume_zero_mutes_and_unmute_restores() {
        let h = harness();
        h.engine.set_volume(0.7);
        h.engine.set_volume(0.0);
        let state = h.engine.state();
        assert!(state.muted);
        assert_eq!(h.device.last_volume(), Some(0.0));

        h.engine.toggle_mute();
        let state = h.engine.state();
        assert!(!state.muted);
        assert_eq!(state.volume, 0.7);
        assert_eq!(h.device.last_volume(), Some(0.7));
    }

    #[tokio::test]
    async fn test_unmute_without_history_uses_default() {
        let h = harness();
        h.engine.set_volume(0.0);
        h.engine.toggle_mute();
        let state = h.engine.state();
        assert!(!state.muted);
        assert!(state.volume > 0.0);
    }

    #[tokio::test]
    async fn test_set_volume_clamps() {
        let h = harness();
        h.engine.set_volume(4.0);
        assert_eq!(h.engine.state().volume, 1.0);
        h.engine.set_volume(-1.0);
        assert!(h.engine.state().muted);
    }

    #[tokio::test]
    async fn test_seek_clamps_to_duration() {
        let h = harness();
        h.engine.play_track(mock_track(1), None).await;
        h.engine.seek(500.0);
        assert_eq!(h.engine.state().elapsed, 200.0);
        assert_eq!(h.device.last_seek(), Some(200.0));
        h.engine.seek(-3.0);
        assert_eq!(h.device.last_seek(), Some(0.0));
    }

    #[tokio::test]
    async fn test_highest_tier_failure_downgrades_once() {
        let h = harness();
        h.engine.set_quality(Quality::HiResLossless);
        h.resolver.mark_unavailable(1, Quality::HiResLossless);

        h.engine.play_track(mock_track(1), None).await;

        let state = h.engine.state();
        assert_eq!(state.status, TransportStatus::Playing);
        assert_eq!(state.resolve, ResolveState::Ready(Quality::Lossless));
        assert_eq!(state.quality, Quality::HiResLossless);
        assert_eq!(
            *h.resolver.requests.lock(),
            vec![(1, Quality::HiResLossless), (1, Quality::Lossless)]
        );
        assert_eq!(*h.library.played.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_lower_tier_failure_gives_up() {
        let h = harness();
        h.device.fail_url(&url(1));

        h.engine.play_track(mock_track(1), None).await;

        let state = h.engine.state();
        assert_eq!(state.status, TransportStatus::Idle);
        assert!(matches!(state.resolve, ResolveState::Failed(_)));
        assert_eq!(h.resolver.requests.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_timeout_triggers_downgrade() {
        let h = harness();
        h.engine.set_quality(Quality::HiResLossless);
        h.device.gate_url(&mock_url(1, Quality::HiResLossless));

        h.engine.play_track(mock_track(1), None).await;

        assert_eq!(h.engine.state().resolve, ResolveState::Ready(Quality::Lossless));
        assert_eq!(h.device.source(), Some(url(1)));
    }

    #[tokio::test]
    async fn test_toggle_pauses_and_resumes() {
        let h = harness();
        h.engine.play_track(mock_track(1), None).await;

        h.engine.toggle_play_pause().await;
        assert_eq!(h.engine.state().status, TransportStatus::Paused);
        assert!(!h.device.is_playing());
        assert_eq!(*h.now_playing.playing.lock(), Some(false));

        h.engine.toggle_play_pause().await;
        assert_eq!(h.engine.state().status, TransportStatus::Playing);
        assert_eq!(h.device.loads().len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_after_failure_reresolves_at_position() {
        let h = harness();
        h.device.fail_url(&url(1));
        h.engine.play_track(mock_track(1), None).await;
        h.engine.seek(30.0);

        h.device.clear_failures();
        h.engine.toggle_play_pause().await;

        assert_eq!(h.engine.state().status, TransportStatus::Playing);
        assert_eq!(h.device.last_seek(), Some(30.0));
        assert_eq!(h.resolver.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_device_pause_event_flushes() {
        let h = harness();
        h.engine.play_track(mock_track(1), None).await;
        let writes = h.store.write_count();

        h.engine.handle_device_event(DeviceEvent::Paused).await;
        assert_eq!(h.engine.state().status, TransportStatus::Paused);
        assert_eq!(h.store.write_count(), writes + 1);
    }

    #[tokio::test]
    async fn test_track_change_forces_snapshot() {
        let h = harness();
        h.engine.play_queue(tracks(1..=3), 1).await;
        let snapshot = h.store.last().unwrap();
        assert_eq!(snapshot.current_track_id, Some(2));
        assert_eq!(snapshot.queue_track_ids, vec![1, 2, 3]);
        assert_eq!(snapshot.current_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_is_debounced() {
        let h = harness();
        let pump = tokio::spawn(Arc::clone(&h.engine).run_persistence());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let baseline = h.store.write_count();

        for v in [0.1, 0.2, 0.3, 0.4] {
            h.engine.set_volume(v);
        }
        assert_eq!(h.store.write_count(), baseline);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(h.store.write_count(), baseline + 1);
        assert_eq!(h.store.last().unwrap().volume, 0.4);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.store.write_count(), baseline + 1);

        h.engine.shutdown().await;
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_applies_settings_and_resumes_lazily() {
        let saved = Snapshot {
            version: crate::player::persist::SNAPSHOT_VERSION,
            current_track_id: Some(2),
            queue_track_ids: vec![1, 2, 3],
            current_index: 1,
            current_time: 64.0,
            volume: 0.3,
            is_muted: false,
            quality: Quality::High,
            repeat_mode: RepeatMode::All,
        };
        let h = harness_with(
            MemorySnapshotStore::with_snapshot(&saved),
            MockResolver::with_tracks(&tracks(1..=3)),
        );

        h.engine.restore().await;
        let state = h.engine.state();
        assert_eq!(state.volume, 0.3);
        assert_eq!(state.quality, Quality::High);
        assert_eq!(state.repeat, RepeatMode::All);
        assert!(state.current_track.is_none());
        assert!(h.engine.has_pending_resume());
        assert!(h.device.loads().is_empty());

        h.engine.toggle_play_pause().await;
        let state = h.engine.state();
        assert_eq!(state.status, TransportStatus::Playing);
        assert_eq!(state.current_track.unwrap().id, 2);
        assert_eq!(state.current_index, 1);
        assert_eq!(h.engine.queue().len(), 3);
        assert_eq!(h.device.source(), Some(mock_url(2, Quality::High)));
        assert_eq!(h.device.last_seek(), Some(64.0));
        assert!(!h.engine.has_pending_resume());
    }

    #[tokio::test]
    async fn test_play_request_discards_pending_resume() {
        let saved = Snapshot {
            version: crate::player::persist::SNAPSHOT_VERSION,
            current_track_id: Some(1),
            queue_track_ids: vec![1],
            current_index: 0,
            current_time: 10.0,
            volume: 1.0,
            is_muted: false,
            quality: Quality::Lossless,
            repeat_mode: RepeatMode::Off,
        };
        let h = harness_with(MemorySnapshotStore::with_snapshot(&saved), MockResolver::new());
        h.engine.restore().await;

        h.engine.play_track(mock_track(7), None).await;
        assert!(!h.engine.has_pending_resume());
        assert_eq!(h.device.last_seek(), None);
    }

    #[tokio::test]
    async fn test_restore_clamps_offset_to_device_duration() {
        let saved = Snapshot {
            version: crate::player::persist::SNAPSHOT_VERSION,
            current_track_id: Some(1),
            queue_track_ids: vec![1],
            current_index: 0,
            current_time: 999.0,
            volume: 1.0,
            is_muted: false,
            quality: Quality::Lossless,
            repeat_mode: RepeatMode::Off,
        };
        let h = harness_with(
            MemorySnapshotStore::with_snapshot(&saved),
            MockResolver::with_tracks(&tracks(1..=1)),
        );
        h.engine.restore().await;
        h.engine.toggle_play_pause().await;
        assert_eq!(h.device.last_seek(), Some(200.0 - RESUME_EPSILON));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let h = harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = h.engine.subscribe(move |s| sink.lock().push(s.status));

        h.engine.play_track(mock_track(1), None).await;
        assert!(seen.lock().contains(&TransportStatus::Loading));
        assert_eq!(seen.lock().last(), Some(&TransportStatus::Playing));

        sub.unsubscribe();
        let count = seen.lock().len();
        h.engine.set_volume(0.5);
        assert_eq!(seen.lock().len(), count);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_stops_device() {
        let h = harness();
        h.engine.play_track(mock_track(1), None).await;
        h.engine.seek(42.0);
        h.engine.shutdown().await;

        assert_eq!(h.store.last().unwrap().current_time, 42.0);
        assert_eq!(h.device.calls().last(), Some(&DeviceCall::Stop));
    }

    #[tokio::test]
    async fn test_device_event_pump_stops_on_close() {
        let h = harness();
        h.engine.play_queue(tracks(1..=2), 0).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(Arc::clone(&h.engine).run_device_events(rx));

        tx.send(DeviceEvent::TimeUpdate(12.0)).unwrap();
        drop(tx);
        pump.await.unwrap();
        assert_eq!(h.engine.state().elapsed, 12.0);
    }
}
