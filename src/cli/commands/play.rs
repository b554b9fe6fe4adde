//! Headless playback and play history commands.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{build_api, format_duration, open_db};
use crate::config::Config;
use crate::db;
use crate::model::Quality;
use crate::player::{
    CpalDevice, KvSnapshotStore, MediaControlsHandle, PlaybackEngine, PlaybackState,
    ResolveState, SqliteLibrary, TransportStatus, run_media_commands,
};

/// How often the command checks whether playback has run out.
const IDLE_CHECK: Duration = Duration::from_millis(500);

/// Play tracks until the queue ends or Ctrl-C
pub fn cmd_play(
    rt: &Runtime,
    config: &Config,
    track_ids: &[u64],
    quality: Option<Quality>,
    shuffle: bool,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_db(config).await?;
        let api = build_api(config, &pool)?;
        let _sweeper = api.cache().spawn_sweeper(config.cache.sweep_interval());

        let cancel = CancellationToken::new();
        let lookups = join_all(track_ids.iter().map(|id| api.track(*id, &cancel))).await;
        let mut tracks = Vec::with_capacity(lookups.len());
        for (id, lookup) in track_ids.iter().zip(lookups) {
            match lookup {
                Ok(track) => tracks.push(track),
                Err(e) => warn!(target: "cli", track_id = *id, error = %e, "Skipping track"),
            }
        }
        if !track_ids.is_empty() && tracks.is_empty() {
            anyhow::bail!("None of the requested tracks could be found");
        }

        let (device, events) = CpalDevice::new()?;
        let mut engine = PlaybackEngine::new(
            Arc::new(device),
            Arc::new(api.clone()),
            Arc::new(SqliteLibrary::new(pool.clone())),
            config.playback.engine_settings(),
        );
        if config.playback.persist {
            engine = engine.with_snapshots(Arc::new(KvSnapshotStore::new(pool.clone())));
        }
        let (engine, media) = match MediaControlsHandle::new() {
            Some((handle, commands)) => (engine.with_now_playing(Arc::new(handle)), Some(commands)),
            None => (engine, None),
        };
        let engine = Arc::new(engine);

        engine.restore().await;
        if let Some(quality) = quality {
            engine.set_quality(quality);
        }

        tokio::spawn(Arc::clone(&engine).run_device_events(events));
        tokio::spawn(Arc::clone(&engine).run_persistence());
        if let Some(commands) = media {
            tokio::spawn(run_media_commands(Arc::clone(&engine), commands));
        }

        let last_track = Mutex::new(None::<u64>);
        engine
            .subscribe(move |state: &PlaybackState| {
                let id = state.current_track.as_ref().map(|t| t.id);
                let mut last = last_track.lock();
                if *last != id {
                    *last = id;
                    if let Some(track) = &state.current_track {
                        println!(
                            "Now playing: {} - {} ({})",
                            track.artist_names(),
                            track.display_title(),
                            format_duration(track.duration)
                        );
                    }
                }
            })
            .detach();

        if tracks.is_empty() {
            if !engine.has_pending_resume() {
                anyhow::bail!("Nothing to resume; pass one or more track IDs");
            }
            info!(target: "cli", "Resuming last session");
            engine.toggle_play_pause().await;
        } else {
            engine.play_queue(tracks, 0).await;
        }
        if shuffle {
            engine.toggle_shuffle();
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let state = engine.state();
                if state.current_track.is_some() {
                    println!("\nStopping at {} / {}.", state.elapsed_str(), state.duration_str());
                } else {
                    println!("\nStopping.");
                }
            }
            _ = wait_until_idle(&engine) => {}
        }

        if let ResolveState::Failed(reason) = engine.state().resolve {
            warn!(target: "cli", %reason, "Playback stopped on error");
        }
        engine.shutdown().await;
        Ok(())
    })
}

/// Resolves once nothing is playing, paused or loading.
async fn wait_until_idle(engine: &PlaybackEngine) {
    loop {
        tokio::time::sleep(IDLE_CHECK).await;
        if engine.state().status == TransportStatus::Idle {
            return;
        }
    }
}

/// Show recently played tracks
pub fn cmd_history(rt: &Runtime, config: &Config, limit: u32) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_db(config).await?;
        let plays = db::recent_plays(&pool, limit).await?;
        if plays.is_empty() {
            println!("No plays recorded yet.");
            return Ok(());
        }
        for entry in plays {
            let played = chrono::DateTime::from_timestamp_millis(entry.played_at)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!(
                "{}  [{}] {} - {} ({})",
                played, entry.track_id, entry.artist, entry.title, entry.album
            );
        }
        Ok(())
    })
}
