//! OS Media Controls integration via souvlaki.
//!
//! Publishes now-playing metadata to the platform media session and turns
//! media keys into engine calls:
//! - Windows: System Media Transport Controls (SMTC)
//! - Linux: MPRIS D-Bus interface
//! - macOS: MediaCenter / Now Playing
//!
//! souvlaki wants its own thread (and on Windows, a window to hang off), so
//! the controls live on a dedicated thread. Updates go in over a channel;
//! commands come back out over a tokio channel and are applied with
//! [`dispatch_media_command`].

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use souvlaki::{
    MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, MediaPosition, PlatformConfig,
    SeekDirection,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::engine::PlaybackEngine;
use super::traits::{NowPlaying, NowPlayingInfo};

/// Step used for relative seeks from the OS.
const SEEK_STEP: f64 = 10.0;

/// Commands received from OS media controls.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaControlCommand {
    Play,
    Pause,
    Toggle,
    Stop,
    Next,
    Previous,
    /// Seek to absolute position
    Seek(Duration),
    /// Seek forward/backward by `by`, or a default step
    SeekRelative(SeekDirection, Option<Duration>),
}

/// Updates sent to the controls thread.
#[derive(Debug, Clone)]
enum MediaControlsUpdate {
    Metadata(NowPlayingInfo),
    Playing(bool),
    Shutdown,
}

/// Handle to the OS media controls thread.
pub struct MediaControlsHandle {
    update_tx: Sender<MediaControlsUpdate>,
}

impl MediaControlsHandle {
    /// Start the media controls thread.
    ///
    /// Returns `None` if the thread could not be spawned.
    pub fn new() -> Option<(Self, mpsc::UnboundedReceiver<MediaControlCommand>)> {
        let (update_tx, update_rx) = crossbeam_channel::unbounded::<MediaControlsUpdate>();
        let (command_tx, command_rx) = mpsc::unbounded_channel::<MediaControlCommand>();

        match std::thread::Builder::new()
            .name("media-controls".into())
            .spawn(move || match run_media_controls(update_rx, command_tx) {
                Ok(()) => tracing::debug!(target: "media_controls", "Media controls thread ended"),
                Err(e) => tracing::warn!(target: "media_controls", error = %e, "Media controls unavailable"),
            }) {
            Ok(_) => Some((Self { update_tx }, command_rx)),
            Err(e) => {
                tracing::error!(target: "media_controls", error = %e, "Failed to spawn media controls thread");
                None
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.update_tx.send(MediaControlsUpdate::Shutdown);
    }
}

impl NowPlaying for MediaControlsHandle {
    fn publish(&self, info: &NowPlayingInfo) {
        let _ = self.update_tx.send(MediaControlsUpdate::Metadata(info.clone()));
    }

    fn set_playing(&self, playing: bool) {
        let _ = self.update_tx.send(MediaControlsUpdate::Playing(playing));
    }
}

impl Drop for MediaControlsHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Map a souvlaki event to a command. Events we don't handle give `None`.
fn to_command(event: MediaControlEvent) -> Option<MediaControlCommand> {
    Some(match event {
        MediaControlEvent::Play => MediaControlCommand::Play,
        MediaControlEvent::Pause => MediaControlCommand::Pause,
        MediaControlEvent::Toggle => MediaControlCommand::Toggle,
        MediaControlEvent::Stop => MediaControlCommand::Stop,
        MediaControlEvent::Next => MediaControlCommand::Next,
        MediaControlEvent::Previous => MediaControlCommand::Previous,
        MediaControlEvent::Seek(dir) => MediaControlCommand::SeekRelative(dir, None),
        MediaControlEvent::SeekBy(dir, by) => MediaControlCommand::SeekRelative(dir, Some(by)),
        MediaControlEvent::SetPosition(MediaPosition(pos)) => MediaControlCommand::Seek(pos),
        _ => return None,
    })
}

/// Apply an OS media command to the engine.
pub async fn dispatch_media_command(engine: &PlaybackEngine, command: MediaControlCommand) {
    tracing::debug!(target: "media_controls", ?command, "Media command");
    let state = engine.state();
    match command {
        MediaControlCommand::Play if !state.is_playing() => engine.toggle_play_pause().await,
        MediaControlCommand::Pause | MediaControlCommand::Stop if state.is_playing() => {
            engine.toggle_play_pause().await
        }
        MediaControlCommand::Toggle => engine.toggle_play_pause().await,
        MediaControlCommand::Next => engine.play_next().await,
        MediaControlCommand::Previous => engine.play_prev().await,
        MediaControlCommand::Seek(pos) => engine.seek(pos.as_secs_f64()),
        MediaControlCommand::SeekRelative(dir, by) => {
            let step = by.map(|d| d.as_secs_f64()).unwrap_or(SEEK_STEP);
            let target = match dir {
                SeekDirection::Forward => state.elapsed + step,
                SeekDirection::Backward => state.elapsed - step,
            };
            engine.seek(target);
        }
        _ => {}
    }
}

/// Forward OS commands to the engine until the channel or engine closes.
pub async fn run_media_commands(
    engine: Arc<PlaybackEngine>,
    mut commands: mpsc::UnboundedReceiver<MediaControlCommand>,
) {
    loop {
        tokio::select! {
            _ = engine.stopped() => break,
            command = commands.recv() => match command {
                Some(command) => dispatch_media_command(&engine, command).await,
                None => break,
            },
        }
    }
}

/// Controls thread body.
fn run_media_controls(
    update_rx: Receiver<MediaControlsUpdate>,
    command_tx: mpsc::UnboundedSender<MediaControlCommand>,
) -> Result<(), String> {
    #[cfg(target_os = "windows")]
    let hwnd = Some(windows::hidden_window()?);

    let config = PlatformConfig {
        dbus_name: "moonsway",
        display_name: "Moonsway",
        #[cfg(target_os = "windows")]
        hwnd,
        #[cfg(not(target_os = "windows"))]
        hwnd: None,
    };

    let mut controls = MediaControls::new(config)
        .map_err(|e| format!("Failed to create media controls: {:?}", e))?;

    controls
        .attach(move |event: MediaControlEvent| {
            if let Some(command) = to_command(event) {
                let _ = command_tx.send(command);
            }
        })
        .map_err(|e| format!("Failed to attach event handler: {:?}", e))?;

    // SMTC ignores the first button press unless the session has been
    // through a playing -> paused cycle
    let _ = controls.set_playback(MediaPlayback::Playing { progress: None });
    std::thread::sleep(Duration::from_millis(50));
    let _ = controls.set_playback(MediaPlayback::Paused { progress: None });

    tracing::info!(target: "media_controls", "Media controls initialized");

    loop {
        #[cfg(target_os = "windows")]
        windows::pump_messages();

        match update_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(MediaControlsUpdate::Metadata(info)) => {
                let cover = info.artwork.last().map(|a| a.src.clone());
                let metadata = MediaMetadata {
                    title: Some(info.title.as_str()),
                    artist: Some(info.artist.as_str()),
                    album: Some(info.album.as_str()),
                    duration: info.duration,
                    cover_url: cover.as_deref(),
                };
                if let Err(e) = controls.set_metadata(metadata) {
                    tracing::debug!(target: "media_controls", "Failed to set metadata: {:?}", e);
                }
            }
            Ok(MediaControlsUpdate::Playing(playing)) => {
                let playback = if playing {
                    MediaPlayback::Playing { progress: None }
                } else {
                    MediaPlayback::Paused { progress: None }
                };
                if let Err(e) = controls.set_playback(playback) {
                    tracing::debug!(target: "media_controls", "Failed to set playback state: {:?}", e);
                }
            }
            Ok(MediaControlsUpdate::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    Ok(())
}

#[cfg(target_os = "windows")]
mod windows {
    use std::ffi::{OsStr, c_void};
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;
    use windows_sys::Win32::Foundation::GetLastError;
    use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DefWindowProcW, DispatchMessageW, PM_REMOVE, PeekMessageW,
        RegisterClassExW, TranslateMessage, WNDCLASSEXW,
    };

    /// SMTC needs a real (if invisible) top-level window.
    pub fn hidden_window() -> Result<*mut c_void, String> {
        let class_name: Vec<u16> = OsStr::new("MoonswaySMTC")
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        unsafe {
            let instance = GetModuleHandleW(ptr::null());
            let class = WNDCLASSEXW {
                cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
                style: 0,
                lpfnWndProc: Some(DefWindowProcW),
                cbClsExtra: 0,
                cbWndExtra: 0,
                hInstance: instance,
                hIcon: ptr::null_mut(),
                hCursor: ptr::null_mut(),
                hbrBackground: ptr::null_mut(),
                lpszMenuName: ptr::null(),
                lpszClassName: class_name.as_ptr(),
                hIconSm: ptr::null_mut(),
            };
            // Zero means the class exists from an earlier start; that's fine
            RegisterClassExW(&class);

            let hwnd = CreateWindowExW(
                0,
                class_name.as_ptr(),
                class_name.as_ptr(),
                0,
                0,
                0,
                0,
                0,
                ptr::null_mut(),
                ptr::null_mut(),
                instance,
                ptr::null(),
            );
            if hwnd.is_null() {
                return Err(format!("CreateWindowExW failed (error {})", GetLastError()));
            }
            Ok(hwnd)
        }
    }

    /// Media key events only arrive while the message queue is pumped.
    pub fn pump_messages() {
        let mut msg = std::mem::MaybeUninit::uninit();
        unsafe {
            while PeekMessageW(msg.as_mut_ptr(), ptr::null_mut(), 0, 0, PM_REMOVE) != 0 {
                let msg = msg.assume_init_ref();
                TranslateMessage(msg);
                DispatchMessageW(msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::engine::EngineSettings;
    use crate::player::state::TransportStatus;
    use crate::player::traits::mocks::{MockDevice, MockLibrary, MockResolver};
    use crate::test_utils::mock_track;

    fn engine() -> PlaybackEngine {
        PlaybackEngine::new(
            Arc::new(MockDevice::new()),
            Arc::new(MockResolver::new()),
            Arc::new(MockLibrary::default()),
            EngineSettings::default(),
        )
    }

    #[test]
    fn test_event_mapping() {
        assert_eq!(to_command(MediaControlEvent::Toggle), Some(MediaControlCommand::Toggle));
        assert_eq!(
            to_command(MediaControlEvent::SetPosition(MediaPosition(Duration::from_secs(5)))),
            Some(MediaControlCommand::Seek(Duration::from_secs(5)))
        );
        assert_eq!(to_command(MediaControlEvent::Raise), None);
    }

    #[tokio::test]
    async fn test_dispatch_play_pause_is_idempotent() {
        let engine = engine();
        engine.play_track(mock_track(1), None).await;

        dispatch_media_command(&engine, MediaControlCommand::Play).await;
        assert_eq!(engine.state().status, TransportStatus::Playing);

        dispatch_media_command(&engine, MediaControlCommand::Pause).await;
        dispatch_media_command(&engine, MediaControlCommand::Pause).await;
        assert_eq!(engine.state().status, TransportStatus::Paused);

        dispatch_media_command(&engine, MediaControlCommand::Toggle).await;
        assert_eq!(engine.state().status, TransportStatus::Playing);
    }

    #[tokio::test]
    async fn test_dispatch_relative_seek() {
        let engine = engine();
        engine.play_track(mock_track(1), None).await;
        engine.seek(30.0);

        dispatch_media_command(
            &engine,
            MediaControlCommand::SeekRelative(SeekDirection::Forward, None),
        )
        .await;
        assert_eq!(engine.state().elapsed, 40.0);

        dispatch_media_command(
            &engine,
            MediaControlCommand::SeekRelative(SeekDirection::Backward, Some(Duration::from_secs(50))),
        )
        .await;
        assert_eq!(engine.state().elapsed, 0.0);
    }

    #[tokio::test]
    async fn test_dispatch_next_prev() {
        let engine = engine();
        engine
            .play_queue(vec![mock_track(1), mock_track(2)], 0)
            .await;
        dispatch_media_command(&engine, MediaControlCommand::Next).await;
        assert_eq!(engine.state().current_index, 1);
        dispatch_media_command(&engine, MediaControlCommand::Previous).await;
        assert_eq!(engine.state().current_index, 0);
    }
}
