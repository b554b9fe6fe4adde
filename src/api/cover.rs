//! Artwork URL construction.
//!
//! Cover and picture IDs are dash-separated UUIDs; the image host lays them
//! out as path segments. Values that are already absolute URLs pass through.

use serde::Serialize;

const IMAGE_HOST: &str = "https://resources.tidal.com/images";

/// Square sizes the image host serves.
pub const ARTWORK_SIZES: [u32; 4] = [80, 160, 320, 640];

/// Build the image URL for `id` at `size` pixels. Empty IDs give "".
pub fn cover_url(id: &str, size: u32) -> String {
    let id = id.trim();
    if id.is_empty() {
        return String::new();
    }
    if id.starts_with("http://") || id.starts_with("https://") {
        return id.to_string();
    }
    format!("{}/{}/{}x{}.jpg", IMAGE_HOST, id.replace('-', "/"), size, size)
}

/// One artwork rendition, as exposed to media sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artwork {
    pub src: String,
    pub size: u32,
}

/// All renditions for an image ID, smallest first.
pub fn artwork_set(id: Option<&str>) -> Vec<Artwork> {
    let Some(id) = id.filter(|s| !s.trim().is_empty()) else {
        return Vec::new();
    };
    ARTWORK_SIZES
        .iter()
        .map(|&size| Artwork {
            src: cover_url(id, size),
            size,
        })
        .collect()
}
