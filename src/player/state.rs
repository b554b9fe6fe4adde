//! Player state types.

use serde::{Deserialize, Serialize};

use crate::model::{Quality, Track};

/// Transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Repeat mode for the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    /// Repeat entire queue
    All,
    /// Repeat current track
    One,
}

impl RepeatMode {
    /// `off -> all -> one -> off`
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

/// Stream resolution progress for the current track.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResolveState {
    #[default]
    Idle,
    /// Looking up a URL at this tier
    Resolving(Quality),
    /// URL resolved and accepted by the device
    Ready(Quality),
    /// Gave up; message is for display only
    Failed(String),
}

/// Observable player state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    /// Track being played or about to be
    pub current_track: Option<Track>,
    /// Index into the active queue
    pub current_index: usize,
    pub status: TransportStatus,
    /// Seconds into the current track
    pub elapsed: f64,
    /// Track length in seconds
    pub duration: f64,
    /// Volume level (0.0 - 1.0)
    pub volume: f64,
    pub muted: bool,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    /// Desired stream tier
    pub quality: Quality,
    pub resolve: ResolveState,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_track: None,
            current_index: 0,
            status: TransportStatus::Idle,
            elapsed: 0.0,
            duration: 0.0,
            volume: 1.0,
            muted: false,
            shuffle: false,
            repeat: RepeatMode::Off,
            quality: Quality::default(),
            resolve: ResolveState::Idle,
        }
    }
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        self.status == TransportStatus::Playing
    }

    /// Volume actually applied to the device.
    pub fn effective_volume(&self) -> f64 {
        if self.muted { 0.0 } else { self.volume }
    }

    /// Get position as a fraction (0.0 - 1.0).
    pub fn position_fraction(&self) -> f64 {
        if self.duration <= 0.0 {
            0.0
        } else {
            (self.elapsed / self.duration).clamp(0.0, 1.0)
        }
    }

    pub fn elapsed_str(&self) -> String {
        format_time(self.elapsed)
    }

    pub fn duration_str(&self) -> String {
        format_time(self.duration)
    }
}

/// Format seconds as M:SS or H:MM:SS. Negative or non-finite input is "0:00".
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let secs = seconds.floor() as u64;
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}
