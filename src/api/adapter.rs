//! Adapters from upstream DTOs to domain models.
//!
//! Each upstream shape has an explicit parser. When a response does not
//! match the v2 envelope, list endpoints fall back to [`find_items`], a
//! recursive search for the first `{ "items": [...] }` object. That shim
//! exists for instances running older or patched backends; it is logged
//! every time it kicks in so drift is visible.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::ApiError;
use super::dto::{
    AlbumDetailDto, AlbumDto, ArtistDetailDto, ArtistDto, BtsManifest, Envelope, ListedItem, Page,
    PlaybackInfoDto, PlaylistDetailDto, PlaylistDto, TrackDto,
};
use crate::model::{Album, AlbumRef, Artist, ArtistRef, Playlist, Quality, Track};

const BTS_MIME: &str = "application/vnd.tidal.bts";

// ============================================================================
// DTO -> domain
// ============================================================================

pub fn to_artist_ref(dto: ArtistDto) -> ArtistRef {
    ArtistRef {
        id: dto.id,
        name: dto.name,
    }
}

pub fn to_album_ref(dto: AlbumDto) -> AlbumRef {
    AlbumRef {
        id: dto.id,
        title: dto.title,
        cover: dto.cover,
    }
}

pub fn to_track(dto: TrackDto) -> Track {
    let artists: Vec<ArtistRef> = dto.artists.into_iter().map(to_artist_ref).collect();
    let artist = dto
        .artist
        .map(to_artist_ref)
        .or_else(|| artists.first().cloned())
        .unwrap_or_default();

    Track {
        id: dto.id,
        title: dto.title,
        duration: dto.duration.unwrap_or(0),
        explicit: dto.explicit.unwrap_or(false),
        artist,
        artists,
        album: dto.album.map(to_album_ref).unwrap_or_default(),
        isrc: dto.isrc,
        track_number: dto.track_number,
        version: dto.version,
        copyright: dto.copyright,
    }
}

pub fn to_album(dto: AlbumDto, tracks: Vec<Track>) -> Album {
    let artist = dto
        .artist
        .or_else(|| dto.artists.into_iter().next())
        .map(to_artist_ref)
        .unwrap_or_default();
    Album {
        id: dto.id,
        title: dto.title,
        cover: dto.cover,
        artist,
        release_date: dto.release_date,
        number_of_tracks: dto.number_of_tracks,
        tracks,
    }
}

pub fn to_playlist(dto: PlaylistDto, tracks: Vec<Track>) -> Playlist {
    Playlist {
        uuid: dto.uuid,
        title: dto.title,
        description: dto.description,
        image: dto.square_image.or(dto.image),
        tracks,
    }
}

// ============================================================================
// Response parsers
// ============================================================================

/// Parse a paged list response.
pub fn parse_page<D: DeserializeOwned>(value: Value) -> Result<Vec<D>, ApiError> {
    if let Ok(envelope) = serde_json::from_value::<Envelope<Page<D>>>(value.clone())
        && envelope.is_supported()
    {
        return Ok(envelope.data.items);
    }

    warn!(target: "api", "Response is not a v2 page, searching for an items list");
    let items = find_items(&value)
        .ok_or_else(|| ApiError::Parse("no items list in response".to_string()))?;
    Ok(decode_lenient(items))
}

/// Recursively find the first `items` array in an arbitrary JSON tree.
///
/// Depth-first, object keys in document order.
pub fn find_items(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("items") {
                return Some(items);
            }
            map.values().find_map(find_items)
        }
        Value::Array(values) => values.iter().find_map(find_items),
        _ => None,
    }
}

/// Decode each element, skipping the ones that don't fit.
fn decode_lenient<D: DeserializeOwned>(items: &[Value]) -> Vec<D> {
    items
        .iter()
        .filter_map(|v| match serde_json::from_value::<D>(v.clone()) {
            Ok(d) => Some(d),
            Err(e) => {
                debug!(target: "api", error = %e, "Skipping undecodable item");
                None
            }
        })
        .collect()
}

/// Tracks from `[{ "item": {...}, "type": "track" }]` listings.
fn listed_tracks(items: Vec<ListedItem<Value>>) -> Vec<Track> {
    items
        .into_iter()
        .filter(|i| i.kind.as_deref().is_none_or(|k| k == "track"))
        .filter_map(|i| serde_json::from_value::<TrackDto>(i.item).ok())
        .map(to_track)
        .collect()
}

fn parse_envelope<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, ApiError> {
    let envelope: Envelope<T> = serde_json::from_value(value)
        .map_err(|e| ApiError::Parse(format!("{}: {}", what, e)))?;
    if !envelope.is_supported() {
        debug!(target: "api", what, version = ?envelope.version, "Unversioned or unknown envelope");
    }
    Ok(envelope.data)
}

pub fn parse_track(value: Value) -> Result<Track, ApiError> {
    parse_envelope::<TrackDto>(value, "track").map(to_track)
}

pub fn parse_album(value: Value) -> Result<Album, ApiError> {
    match parse_envelope::<AlbumDetailDto>(value.clone(), "album") {
        Ok(detail) => {
            let tracks = listed_tracks(detail.items);
            Ok(to_album(detail.album, tracks))
        }
        Err(e) => {
            // Some instances split metadata and listing; take what we can find
            let album = value
                .get("data")
                .cloned()
                .and_then(|d| serde_json::from_value::<AlbumDto>(d).ok())
                .ok_or(e)?;
            warn!(target: "api", album_id = album.id, "Album listing not in v2 shape, using fallback");
            let tracks = find_items(&value)
                .map(|items| {
                    let listed: Vec<ListedItem<Value>> = decode_lenient(items);
                    listed_tracks(listed)
                })
                .unwrap_or_default();
            Ok(to_album(album, tracks))
        }
    }
}

pub fn parse_artist(value: Value) -> Result<Artist, ApiError> {
    let detail = parse_envelope::<ArtistDetailDto>(value, "artist")?;
    Ok(Artist {
        id: detail.artist.id,
        name: detail.artist.name,
        picture: detail.artist.picture,
        top_tracks: detail.tracks.into_iter().map(to_track).collect(),
        albums: detail
            .albums
            .map(|page| page.items.into_iter().map(to_album_ref).collect())
            .unwrap_or_default(),
    })
}

pub fn parse_playlist(value: Value) -> Result<Playlist, ApiError> {
    let detail = parse_envelope::<PlaylistDetailDto>(value, "playlist")?;
    let tracks = listed_tracks(detail.items);
    Ok(to_playlist(detail.playlist, tracks))
}

/// Extract a directly playable URL from a `/track/` response.
///
/// Only BTS manifests carry plain URLs; DASH or encrypted manifests mean
/// there is no representation we can hand to the audio output at this tier.
pub fn parse_stream_url(value: Value, track_id: u64, quality: Quality) -> Result<String, ApiError> {
    let unavailable = || ApiError::Unavailable { track_id, quality };

    let info = parse_envelope::<PlaybackInfoDto>(value, "playback info")?;
    let mime = info.manifest_mime_type.as_deref().unwrap_or(BTS_MIME);
    if mime != BTS_MIME {
        debug!(target: "api", track_id, %quality, mime, "Manifest type not playable");
        return Err(unavailable());
    }

    let encoded = info.manifest.ok_or_else(unavailable)?;
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::Parse(format!("manifest base64: {}", e)))?;
    let manifest: BtsManifest = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::Parse(format!("manifest json: {}", e)))?;

    if manifest
        .encryption_type
        .as_deref()
        .is_some_and(|t| !t.eq_ignore_ascii_case("NONE"))
    {
        return Err(unavailable());
    }

    manifest.urls.into_iter().next().ok_or_else(unavailable)
}
