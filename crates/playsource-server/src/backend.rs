//! Playback backend abstraction.
//!
//! The session and queue handler only talk to the playback engine through
//! [`PlaybackBackend`]. The engine offers plain request/response calls and no
//! push notifications; song completion has to be inferred from `history`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Artist attached to a resolved track.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artist {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub name: String,
}

/// Backend-resolved playable track.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    /// Track length in milliseconds, when the backend knows it.
    #[serde(default, rename = "length")]
    pub length_ms: Option<u64>,
    #[serde(default)]
    pub artists: Vec<Artist>,
}

/// One group of search hits (the backend groups results per library source).
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    #[serde(default)]
    pub tracks: Vec<Track>,
}

/// Search terms for a track lookup. Empty term lists are not sent.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SearchQuery {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub track_name: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artist: Vec<String>,
}

impl SearchQuery {
    /// Build a query from a song title and its artists.
    pub fn for_song(name: &str, artists: &[String]) -> Self {
        let track_name = if name.trim().is_empty() {
            Vec::new()
        } else {
            vec![name.to_string()]
        };
        Self {
            track_name,
            artist: artists.to_vec(),
        }
    }

    /// No terms at all. Mopidy treats this as "match everything".
    pub fn is_empty(&self) -> bool {
        self.track_name.is_empty() && self.artist.is_empty()
    }
}

/// Play state reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayState {
    Unknown,
    Playing,
    Paused,
    Stopped,
}

impl PlayState {
    /// Parse the backend's state string.
    pub fn from_wire(state: &str) -> Self {
        match state {
            "playing" => PlayState::Playing,
            "paused" => PlayState::Paused,
            "stopped" => PlayState::Stopped,
            _ => PlayState::Unknown,
        }
    }
}

/// Flatten search result groups into tracks, preserving backend order.
pub fn flatten_results(results: Vec<SearchResult>) -> Vec<Track> {
    results.into_iter().flat_map(|group| group.tracks).collect()
}

#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Search the library for tracks matching the query.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>>;
    /// Append tracks to the tracklist; returns the tracks actually added.
    async fn add_tracks(&self, tracks: &[Track]) -> Result<Vec<Track>>;
    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    /// Skip to the next track on the tracklist.
    async fn next(&self) -> Result<()>;
    async fn state(&self) -> Result<PlayState>;
    /// Played track URIs, oldest first.
    async fn history(&self) -> Result<Vec<String>>;
    /// Toggle removal of tracks from the tracklist once played.
    async fn set_consume(&self, enabled: bool) -> Result<()>;
    async fn clear_tracklist(&self) -> Result<()>;
    async fn current_track(&self) -> Result<Option<Track>>;
    /// Address used for readiness probing, if the backend is remote.
    fn endpoint(&self) -> Option<&str> {
        None
    }
}
