//! Upstream response shapes (v2 envelopes).
//!
//! These structs mirror the JSON the backend instances return, field for
//! field. They are deliberately permissive (`Option` + `#[serde(default)]`)
//! and never leak past `adapter`.

use serde::Deserialize;

/// Envelope version this module understands.
pub const SUPPORTED_VERSION: &str = "2";

/// `{ "version": "2.x", "data": ... }`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub version: Option<String>,
    pub data: T,
}

impl<T> Envelope<T> {
    /// Whether the major version is one we parse strictly.
    pub fn is_supported(&self) -> bool {
        self.version
            .as_deref()
            .map(|v| v.split('.').next() == Some(SUPPORTED_VERSION))
            .unwrap_or(false)
    }
}

/// A paged list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub total_number_of_items: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtistDto {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumDto {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub artist: Option<ArtistDto>,
    #[serde(default)]
    pub artists: Vec<ArtistDto>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub number_of_tracks: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDto {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub explicit: Option<bool>,
    #[serde(default)]
    pub artist: Option<ArtistDto>,
    #[serde(default)]
    pub artists: Vec<ArtistDto>,
    #[serde(default)]
    pub album: Option<AlbumDto>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistDto {
    pub uuid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub square_image: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Album and playlist listings wrap each track: `{ "item": {...}, "type": "track" }`.
#[derive(Debug, Deserialize)]
pub struct ListedItem<T> {
    pub item: T,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// `/album/` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumDetailDto {
    #[serde(flatten)]
    pub album: AlbumDto,
    #[serde(default)]
    pub items: Vec<ListedItem<serde_json::Value>>,
}

/// `/artist/` payload.
#[derive(Debug, Deserialize)]
pub struct ArtistDetailDto {
    pub artist: ArtistDto,
    #[serde(default)]
    pub tracks: Vec<TrackDto>,
    #[serde(default)]
    pub albums: Option<Page<AlbumDto>>,
}

/// `/playlist/` payload.
#[derive(Debug, Deserialize)]
pub struct PlaylistDetailDto {
    pub playlist: PlaylistDto,
    #[serde(default)]
    pub items: Vec<ListedItem<serde_json::Value>>,
}

/// `/track/` payload (playback info).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackInfoDto {
    #[serde(default)]
    pub track_id: Option<u64>,
    #[serde(default)]
    pub audio_quality: Option<String>,
    #[serde(default)]
    pub manifest_mime_type: Option<String>,
    #[serde(default)]
    pub manifest: Option<String>,
}

/// Decoded `application/vnd.tidal.bts` manifest.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BtsManifest {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub codecs: Option<String>,
    #[serde(default)]
    pub encryption_type: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}
