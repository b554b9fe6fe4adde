//! Core data models for the catalog and playback.
//!
//! Defines the primary entities: [`Track`], [`ArtistRef`], [`AlbumRef`] and
//! the richer detail types returned by catalog lookups ([`Album`],
//! [`Artist`], [`Playlist`]). These are OUR types; upstream response shapes
//! live in `api::dto` and are converted by `api::adapter`.
//!
//! All models are plain values. A track is identified by `id`; every other
//! field is descriptive.

use serde::{Deserialize, Serialize};

/// Reference to an artist as embedded in a track or album.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArtistRef {
    /// Catalog ID
    pub id: u64,
    /// Display name
    pub name: String,
}

/// Reference to the album a track belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlbumRef {
    /// Catalog ID
    pub id: u64,
    /// Album title
    pub title: String,
    /// Cover image ID (or absolute URL)
    pub cover: Option<String>,
}

/// A playable track.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    /// Catalog ID (identity)
    pub id: u64,
    /// Track title
    pub title: String,
    /// Duration in seconds
    pub duration: u32,
    /// Explicit content flag
    pub explicit: bool,
    /// Primary artist
    pub artist: ArtistRef,
    /// Featured / additional artists
    pub artists: Vec<ArtistRef>,
    /// Owning album
    pub album: AlbumRef,
    /// International Standard Recording Code
    pub isrc: Option<String>,
    /// Position on the album
    pub track_number: Option<u32>,
    /// Version tag ("Remastered", "Live", ...)
    pub version: Option<String>,
    /// Copyright line
    pub copyright: Option<String>,
}

impl Track {
    /// Title including the version tag, if any.
    pub fn display_title(&self) -> String {
        match self.version.as_deref() {
            Some(v) if !v.is_empty() => format!("{} ({})", self.title, v),
            _ => self.title.clone(),
        }
    }

    /// Comma-joined artist names, primary first, without duplicates.
    pub fn artist_names(&self) -> String {
        let mut names: Vec<&str> = vec![self.artist.name.as_str()];
        for a in &self.artists {
            if !names.contains(&a.name.as_str()) {
                names.push(&a.name);
            }
        }
        names.retain(|n| !n.is_empty());
        names.join(", ")
    }
}

/// Album detail with its track listing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Album {
    pub id: u64,
    pub title: String,
    pub cover: Option<String>,
    pub artist: ArtistRef,
    pub release_date: Option<String>,
    pub number_of_tracks: Option<u32>,
    pub tracks: Vec<Track>,
}

/// Artist detail with top tracks and albums.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Artist {
    pub id: u64,
    pub name: String,
    pub picture: Option<String>,
    pub top_tracks: Vec<Track>,
    pub albums: Vec<AlbumRef>,
}

/// Playlist detail with its tracks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Playlist {
    /// Playlist UUID
    pub uuid: String,
    pub title: String,
    pub description: Option<String>,
    /// Square image ID
    pub image: Option<String>,
    pub tracks: Vec<Track>,
}

/// Stream quality tier, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    Low,
    High,
    #[default]
    Lossless,
    HiResLossless,
}

impl Quality {
    /// The best tier the backends offer.
    pub const HIGHEST: Quality = Quality::HiResLossless;

    /// Upstream name, as used in query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Low => "LOW",
            Quality::High => "HIGH",
            Quality::Lossless => "LOSSLESS",
            Quality::HiResLossless => "HI_RES_LOSSLESS",
        }
    }

    /// Next lower tier, if any.
    pub fn downgrade(self) -> Option<Quality> {
        match self {
            Quality::HiResLossless => Some(Quality::Lossless),
            Quality::Lossless => Some(Quality::High),
            Quality::High => Some(Quality::Low),
            Quality::Low => None,
        }
    }

    /// Whether this is the highest tier.
    pub fn is_highest(self) -> bool {
        self == Self::HIGHEST
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "LOW" => Ok(Quality::Low),
            "HIGH" => Ok(Quality::High),
            "LOSSLESS" => Ok(Quality::Lossless),
            "HI_RES_LOSSLESS" | "HI_RES" => Ok(Quality::HiResLossless),
            other => Err(format!("unknown quality tier: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_title_with_version() {
        let track = Track {
            title: "Song".to_string(),
            version: Some("Remastered".to_string()),
            ..Default::default()
        };
        assert_eq!(track.display_title(), "Song (Remastered)");

        let plain = Track {
            title: "Song".to_string(),
            version: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(plain.display_title(), "Song");
    }

    #[test]
    fn test_artist_names_dedupes_primary() {
        let main = ArtistRef { id: 1, name: "Main".to_string() };
        let track = Track {
            artist: main.clone(),
            artists: vec![main, ArtistRef { id: 2, name: "Guest".to_string() }],
            ..Default::default()
        };
        assert_eq!(track.artist_names(), "Main, Guest");
    }

    #[test]
    fn test_quality_downgrade_chain() {
        assert_eq!(Quality::HiResLossless.downgrade(), Some(Quality::Lossless));
        assert_eq!(Quality::Low.downgrade(), None);
        assert!(Quality::HiResLossless.is_highest());
        assert!(!Quality::Lossless.is_highest());
    }

    #[test]
    fn test_quality_parse_and_serde() {
        assert_eq!("hi-res".parse::<Quality>().unwrap(), Quality::HiResLossless);
        assert_eq!("lossless".parse::<Quality>().unwrap(), Quality::Lossless);
        assert!("ultra".parse::<Quality>().is_err());

        let json = serde_json::to_string(&Quality::HiResLossless).unwrap();
        assert_eq!(json, "\"HI_RES_LOSSLESS\"");
    }
}
