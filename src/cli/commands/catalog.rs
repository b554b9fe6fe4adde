//! Catalog lookup commands.

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use super::{SearchTarget, build_api, format_duration, open_db};
use crate::api::{ApiError, MusicApi, cover_url};
use crate::config::Config;
use crate::error::Error;
use crate::model::{Quality, Track};

/// Run a lookup with Ctrl-C wired to cancellation.
async fn with_api<T, F, Fut>(config: &Config, f: F) -> anyhow::Result<T>
where
    F: FnOnce(MusicApi, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<T, ApiError>>,
{
    let pool = open_db(config).await?;
    let api = build_api(config, &pool)?;
    let cancel = CancellationToken::new();

    let guard = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            guard.cancel();
        }
    });

    let result = f(api, cancel).await.map_err(Error::from);
    interrupt.abort();

    match result {
        Err(e) if e.is_aborted() => anyhow::bail!("Interrupted"),
        other => Ok(other?),
    }
}

fn print_track_line(index: usize, track: &Track) {
    println!(
        "{:>3}. [{}] {} - {} ({}){}",
        index + 1,
        track.id,
        track.artist_names(),
        track.display_title(),
        format_duration(track.duration),
        if track.explicit { " [E]" } else { "" }
    );
}

/// Search the catalog
pub fn cmd_search(
    rt: &Runtime,
    config: &Config,
    query: &str,
    kind: SearchTarget,
) -> anyhow::Result<()> {
    rt.block_on(async {
        match kind {
            SearchTarget::Tracks => {
                let tracks =
                    with_api(config, |api, c| async move { api.search_tracks(query, &c).await })
                        .await?;
                for (i, track) in tracks.iter().enumerate() {
                    print_track_line(i, track);
                }
                println!("{} tracks", tracks.len());
            }
            SearchTarget::Albums => {
                let albums =
                    with_api(config, |api, c| async move { api.search_albums(query, &c).await })
                        .await?;
                for album in &albums {
                    println!("[{}] {} - {}", album.id, album.artist.name, album.title);
                }
                println!("{} albums", albums.len());
            }
            SearchTarget::Artists => {
                let artists =
                    with_api(config, |api, c| async move { api.search_artists(query, &c).await })
                        .await?;
                for artist in &artists {
                    println!("[{}] {}", artist.id, artist.name);
                }
                println!("{} artists", artists.len());
            }
            SearchTarget::Playlists => {
                let playlists = with_api(config, |api, c| async move {
                    api.search_playlists(query, &c).await
                })
                .await?;
                for playlist in &playlists {
                    println!("[{}] {}", playlist.uuid, playlist.title);
                }
                println!("{} playlists", playlists.len());
            }
        }
        Ok(())
    })
}

/// Show an album and its tracks
pub fn cmd_album(rt: &Runtime, config: &Config, id: u64) -> anyhow::Result<()> {
    rt.block_on(async {
        let album = with_api(config, |api, c| async move { api.album(id, &c).await }).await?;
        println!("{} - {}", album.artist.name, album.title);
        if let Some(date) = &album.release_date {
            println!("Released: {}", date);
        }
        if let Some(cover) = &album.cover {
            println!("Cover: {}", cover_url(cover, 640));
        }
        println!();
        for (i, track) in album.tracks.iter().enumerate() {
            print_track_line(i, track);
        }
        Ok(())
    })
}

/// Show an artist's top tracks and albums
pub fn cmd_artist(rt: &Runtime, config: &Config, id: u64) -> anyhow::Result<()> {
    rt.block_on(async {
        let artist = with_api(config, |api, c| async move { api.artist(id, &c).await }).await?;
        println!("{}", artist.name);

        if !artist.top_tracks.is_empty() {
            println!("\nTop tracks:");
            for (i, track) in artist.top_tracks.iter().enumerate() {
                print_track_line(i, track);
            }
        }
        if !artist.albums.is_empty() {
            println!("\nAlbums:");
            for album in &artist.albums {
                println!("  [{}] {}", album.id, album.title);
            }
        }
        Ok(())
    })
}

/// Show a playlist and its tracks
pub fn cmd_playlist(rt: &Runtime, config: &Config, id: &str) -> anyhow::Result<()> {
    rt.block_on(async {
        let playlist =
            with_api(config, |api, c| async move { api.playlist(id, &c).await }).await?;
        println!("{}", playlist.title);
        if let Some(description) = playlist.description.as_deref().filter(|d| !d.is_empty()) {
            println!("{}", description);
        }
        println!();
        for (i, track) in playlist.tracks.iter().enumerate() {
            print_track_line(i, track);
        }
        Ok(())
    })
}

/// Resolve a playable stream URL for a track
pub fn cmd_stream(rt: &Runtime, config: &Config, track_id: u64, quality: Quality) -> anyhow::Result<()> {
    rt.block_on(async {
        let url = with_api(config, |api, c| async move {
            api.stream_url(track_id, quality, &c).await
        })
        .await?;
        println!("{}", url);
        Ok(())
    })
}
