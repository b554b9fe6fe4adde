//! Catalog and stream-resolution client.
//!
//! [`MusicApi`] combines the [`FailoverClient`] (every request is tried
//! across the instance pool) with the [`ResponseCache`] (idempotent lookups
//! are memoized). Responses are normalized into `crate::model` types by
//! [`adapter`].
//!
//! All lookups accept a [`CancellationToken`]; cancelling aborts the
//! in-flight request and surfaces as [`ApiError::is_aborted`].

pub mod adapter;
pub mod cover;
pub mod dto;

pub use cover::{ARTWORK_SIZES, Artwork, artwork_set, cover_url};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{CacheError, CacheKind, ResponseCache};
use crate::failover::{FailoverClient, FailoverError, RequestClass};
use crate::model::{Album, Artist, Playlist, Quality, Track};
use dto::{AlbumDto, ArtistDto, PlaylistDto, TrackDto};

/// API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Failover(#[from] FailoverError),

    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    /// No playable representation at this quality tier
    #[error("track {track_id} unavailable at {quality}")]
    Unavailable { track_id: u64, quality: Quality },

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ApiError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, ApiError::Failover(e) if e.is_aborted())
    }

    /// Turn an upstream 404 into [`ApiError::NotFound`].
    fn not_found_for(self, what: &'static str, id: impl ToString) -> Self {
        match self {
            ApiError::Failover(ref e) if e.status() == Some(404) => ApiError::NotFound {
                what,
                id: id.to_string(),
            },
            other => other,
        }
    }
}

/// Search categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Tracks,
    Albums,
    Artists,
    Playlists,
}

impl SearchKind {
    fn query_param(self) -> &'static str {
        match self {
            SearchKind::Tracks => "s",
            SearchKind::Albums => "al",
            SearchKind::Artists => "a",
            SearchKind::Playlists => "p",
        }
    }

    fn cache_kind(self) -> CacheKind {
        match self {
            SearchKind::Tracks => CacheKind::SearchTracks,
            SearchKind::Albums => CacheKind::SearchAlbums,
            SearchKind::Artists => CacheKind::SearchArtists,
            SearchKind::Playlists => CacheKind::SearchPlaylists,
        }
    }
}

/// Cached catalog client.
#[derive(Clone)]
pub struct MusicApi {
    client: FailoverClient,
    cache: Arc<ResponseCache>,
}

impl MusicApi {
    pub fn new(client: FailoverClient, cache: Arc<ResponseCache>) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn client(&self) -> &FailoverClient {
        &self.client
    }

    /// Memoized GET + parse.
    async fn cached<T, P>(
        &self,
        kind: CacheKind,
        params: &str,
        path: String,
        class: RequestClass,
        cancel: &CancellationToken,
        parse: P,
    ) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned,
        P: FnOnce(Value) -> Result<T, ApiError>,
    {
        self.cache
            .get_or_fetch(kind, params, || async {
                debug!(target: "api", %path, "Cache miss, fetching");
                let body: Value = self.client.get_json(&path, class, cancel).await?;
                parse(body)
            })
            .await
    }

    async fn search<D: DeserializeOwned, T: Serialize + DeserializeOwned>(
        &self,
        kind: SearchKind,
        query: &str,
        cancel: &CancellationToken,
        convert: impl Fn(D) -> T,
    ) -> Result<Vec<T>, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let path = format!(
            "/search/?{}={}",
            kind.query_param(),
            urlencoding::encode(query)
        );
        self.cached(
            kind.cache_kind(),
            &query.to_lowercase(),
            path,
            RequestClass::Metadata,
            cancel,
            |body| Ok(adapter::parse_page::<D>(body)?.into_iter().map(&convert).collect()),
        )
        .await
    }

    pub async fn search_tracks(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Track>, ApiError> {
        self.search::<TrackDto, _>(SearchKind::Tracks, query, cancel, adapter::to_track)
            .await
    }

    pub async fn search_albums(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Album>, ApiError> {
        self.search::<AlbumDto, _>(SearchKind::Albums, query, cancel, |dto| {
            adapter::to_album(dto, Vec::new())
        })
        .await
    }

    pub async fn search_artists(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Artist>, ApiError> {
        self.search::<ArtistDto, _>(SearchKind::Artists, query, cancel, |dto| Artist {
            id: dto.id,
            name: dto.name,
            picture: dto.picture,
            ..Default::default()
        })
        .await
    }

    pub async fn search_playlists(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Playlist>, ApiError> {
        self.search::<PlaylistDto, _>(SearchKind::Playlists, query, cancel, |dto| {
            adapter::to_playlist(dto, Vec::new())
        })
        .await
    }

    pub async fn track(&self, id: u64, cancel: &CancellationToken) -> Result<Track, ApiError> {
        self.cached(
            CacheKind::Track,
            &id.to_string(),
            format!("/info/?id={}", id),
            RequestClass::Metadata,
            cancel,
            adapter::parse_track,
        )
        .await
        .map_err(|e| e.not_found_for("track", id))
    }

    pub async fn album(&self, id: u64, cancel: &CancellationToken) -> Result<Album, ApiError> {
        self.cached(
            CacheKind::Album,
            &id.to_string(),
            format!("/album/?id={}", id),
            RequestClass::Metadata,
            cancel,
            adapter::parse_album,
        )
        .await
        .map_err(|e| e.not_found_for("album", id))
    }

    pub async fn artist(&self, id: u64, cancel: &CancellationToken) -> Result<Artist, ApiError> {
        self.cached(
            CacheKind::Artist,
            &id.to_string(),
            format!("/artist/?id={}", id),
            RequestClass::Metadata,
            cancel,
            adapter::parse_artist,
        )
        .await
        .map_err(|e| e.not_found_for("artist", id))
    }

    pub async fn playlist(
        &self,
        uuid: &str,
        cancel: &CancellationToken,
    ) -> Result<Playlist, ApiError> {
        self.cached(
            CacheKind::Playlist,
            uuid,
            format!("/playlist/?id={}", urlencoding::encode(uuid)),
            RequestClass::Metadata,
            cancel,
            adapter::parse_playlist,
        )
        .await
        .map_err(|e| e.not_found_for("playlist", uuid))
    }

    /// Resolve a directly playable URL for `track_id` at `quality`.
    pub async fn stream_url(
        &self,
        track_id: u64,
        quality: Quality,
        cancel: &CancellationToken,
    ) -> Result<String, ApiError> {
        self.cached(
            CacheKind::Stream,
            &format!("{}:{}", track_id, quality.as_str()),
            format!("/track/?id={}&quality={}", track_id, quality.as_str()),
            RequestClass::Streaming,
            cancel,
            |body| adapter::parse_stream_url(body, track_id, quality),
        )
        .await
        .map_err(|e| e.not_found_for("track", track_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::mocks::{Reply, ScriptedTransport};
    use crate::failover::{InstancePool, RetryPolicy};
    use base64::Engine;
    use serde_json::json;
    use std::time::Duration;

    const META: &str = "https://meta.test";
    const STREAM: &str = "https://stream.test";

    fn api(transport: Arc<ScriptedTransport>) -> MusicApi {
        let pool = InstancePool::new(vec![META.to_string()], vec![STREAM.to_string()]);
        let client = FailoverClient::new(transport, pool).with_policy(RetryPolicy {
            rate_limit_delay: Duration::ZERO,
            network_delay: Duration::ZERO,
        });
        MusicApi::new(client, Arc::new(ResponseCache::in_memory()))
    }

    fn search_body() -> String {
        json!({
            "version": "2.0",
            "data": {"items": [{"id": 1, "title": "Veridis Quo", "duration": 345,
                                "artist": {"id": 1, "name": "Daft Punk"}}]}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_search_tracks_is_cached() {
        let transport = Arc::new(ScriptedTransport::new().on(META, vec![Reply::ok(&search_body())]));
        let api = api(Arc::clone(&transport));
        let cancel = CancellationToken::new();

        let first = api.search_tracks("Daft Punk", &cancel).await.unwrap();
        let second = api.search_tracks("daft punk", &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].title, "Veridis Quo");
        assert_eq!(transport.attempts(), 1);
        assert_eq!(
            transport.requests.lock()[0],
            "https://meta.test/search/?s=Daft%20Punk"
        );
    }

    #[tokio::test]
    async fn test_empty_query_skips_network() {
        let transport = Arc::new(ScriptedTransport::new());
        let api = api(Arc::clone(&transport));
        assert!(api.search_albums("  ", &CancellationToken::new()).await.unwrap().is_empty());
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test]
    async fn test_not_found_is_mapped() {
        let transport = Arc::new(ScriptedTransport::new().on(META, vec![Reply::status(404)]));
        let api = api(transport);
        let err = api.album(5, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound { what: "album", .. }));
    }

    #[tokio::test]
    async fn test_stream_url_uses_streaming_pool() {
        let manifest = json!({"mimeType": "audio/flac", "urls": ["https://cdn.test/7.flac"]});
        let body = json!({
            "version": "2.0",
            "data": {
                "trackId": 7,
                "manifestMimeType": "application/vnd.tidal.bts",
                "manifest": base64::engine::general_purpose::STANDARD.encode(manifest.to_string())
            }
        });
        let transport = Arc::new(ScriptedTransport::new().on(STREAM, vec![Reply::ok(&body.to_string())]));
        let api = api(Arc::clone(&transport));

        let url = api
            .stream_url(7, Quality::Lossless, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.test/7.flac");
        assert_eq!(
            transport.requests.lock()[0],
            "https://stream.test/track/?id=7&quality=LOSSLESS"
        );
        assert!(api.cache().get(CacheKind::Stream, "7:LOSSLESS").await.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_lookup_is_aborted() {
        let transport = Arc::new(ScriptedTransport::new().on(META, vec![Reply::Hang]));
        let api = api(transport);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = api.track(1, &cancel).await.unwrap_err();
        assert!(err.is_aborted());
    }
}
