//! Playback engine with a single audio output.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   PlaybackEngine (tokio tasks)                  │
//! │  Queue, transport state, quality fallback, snapshot persistence │
//! └──────┬──────────────────────┬──────────────────────┬────────────┘
//!        │ StreamResolver       │ AudioDevice          │ NowPlaying
//!        ▼                      ▼                      ▼
//! ┌──────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │   MusicApi   │   │  Output thread      │   │  OS media controls  │
//! │ (failover +  │   │  symphonia → cpal   │   │  (souvlaki thread)  │
//! │   cache)     │   │  emits DeviceEvents │   │  sends commands     │
//! └──────────────┘   └─────────────────────┘   └─────────────────────┘
//! ```
//!
//! The engine never holds its state lock across an await. Every load takes
//! a fresh token; work belonging to a superseded load notices the token
//! changed and drops its results.

mod decoder;
mod engine;
mod media_controls;
mod output;
mod persist;
mod queue;
mod state;
mod traits;

pub use engine::{EngineSettings, PlaybackEngine};
pub use media_controls::{
    MediaControlCommand, MediaControlsHandle, dispatch_media_command, run_media_commands,
};
pub use output::CpalDevice;
pub use persist::{KvSnapshotStore, Snapshot, SnapshotStore};
pub use queue::PlayQueue;
pub use state::{PlaybackState, RepeatMode, ResolveState, TransportStatus, format_time};
pub use traits::{
    AudioDevice, DeviceError, DeviceEvent, Library, NowPlaying, NowPlayingInfo, ResolveError,
    SqliteLibrary, StreamResolver,
};
