//! Mopidy JSON-RPC client.
//!
//! Wraps the Mopidy HTTP JSON-RPC endpoint with timeouts and JSON decoding.
//! Each client instance owns its request id counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::backend::{PlayState, PlaybackBackend, SearchQuery, SearchResult, Track};

const JSON_RPC_VERSION: &str = "2.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// A tracklist entry as returned by `core.tracklist.add`.
#[derive(Debug, Deserialize)]
struct TlTrack {
    track: Track,
}

/// Reference to a played track inside a history entry.
#[derive(Debug, Deserialize)]
struct HistoryRef {
    uri: String,
}

/// HTTP JSON-RPC client for a Mopidy server.
pub struct MopidyClient {
    url: String,
    client: Client,
    next_id: AtomicU64,
}

impl MopidyClient {
    /// Create a client for the given JSON-RPC endpoint.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build mopidy http client")?;
        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(0),
        })
    }

    fn envelope<'a>(&self, method: &'a str, params: Value) -> RpcRequest<'a> {
        RpcRequest {
            jsonrpc: JSON_RPC_VERSION,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = self.envelope(method, params);
        tracing::trace!(method, id = body.id, "mopidy request");
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("mopidy {method} request failed"))?;
        if !resp.status().is_success() {
            return Err(anyhow!("mopidy {method} failed with status {}", resp.status()));
        }
        let resp: RpcResponse = resp
            .json()
            .await
            .with_context(|| format!("mopidy {method} decode failed"))?;
        into_result(method, resp)
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result).with_context(|| format!("mopidy {method} result"))
    }
}

fn into_result(method: &str, resp: RpcResponse) -> Result<Value> {
    match resp.error {
        Some(err) => Err(anyhow!(
            "mopidy {method}: code = {}, message = {}",
            err.code,
            err.message
        )),
        None => Ok(resp.result),
    }
}

/// Decode `core.history.get_history` (newest first) into URIs, oldest first.
fn parse_history(result: Value) -> Result<Vec<String>> {
    let entries: Vec<(Value, HistoryRef)> =
        serde_json::from_value(result).context("decode history entries")?;
    Ok(entries.into_iter().rev().map(|(_, r)| r.uri).collect())
}

fn parse_tl_tracks(result: Value) -> Result<Vec<Track>> {
    let added: Vec<TlTrack> = serde_json::from_value(result).context("decode tracklist entries")?;
    Ok(added.into_iter().map(|tl| tl.track).collect())
}

#[async_trait]
impl PlaybackBackend for MopidyClient {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        self.call_as("core.library.search", json!({ "query": query }))
            .await
    }

    async fn add_tracks(&self, tracks: &[Track]) -> Result<Vec<Track>> {
        let uris: Vec<&str> = tracks.iter().map(|t| t.uri.as_str()).collect();
        let result = self
            .call("core.tracklist.add", json!({ "uris": uris }))
            .await?;
        parse_tl_tracks(result)
    }

    async fn play(&self) -> Result<()> {
        self.call("core.playback.play", json!({})).await.map(|_| ())
    }

    async fn pause(&self) -> Result<()> {
        self.call("core.playback.pause", json!({})).await.map(|_| ())
    }

    async fn resume(&self) -> Result<()> {
        self.call("core.playback.resume", json!({})).await.map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        self.call("core.playback.stop", json!({})).await.map(|_| ())
    }

    async fn next(&self) -> Result<()> {
        self.call("core.playback.next", json!({})).await.map(|_| ())
    }

    async fn state(&self) -> Result<PlayState> {
        let state: String = self.call_as("core.playback.get_state", json!({})).await?;
        Ok(PlayState::from_wire(&state))
    }

    async fn history(&self) -> Result<Vec<String>> {
        let result = self.call("core.history.get_history", json!({})).await?;
        parse_history(result)
    }

    async fn set_consume(&self, enabled: bool) -> Result<()> {
        self.call("core.tracklist.set_consume", json!({ "value": enabled }))
            .await
            .map(|_| ())
    }

    async fn clear_tracklist(&self) -> Result<()> {
        self.call("core.tracklist.clear", json!({})).await.map(|_| ())
    }

    async fn current_track(&self) -> Result<Option<Track>> {
        self.call_as("core.playback.get_current_track", json!({}))
            .await
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.url)
    }
}
