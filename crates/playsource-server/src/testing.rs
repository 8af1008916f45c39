//! Scripted backend for unit tests.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::backend::{Artist, PlayState, PlaybackBackend, SearchQuery, SearchResult, Track};

struct FakeState {
    missing: HashSet<String>,
    add_returns_nothing: bool,
    failing: HashSet<&'static str>,
    tracklist: Vec<Track>,
    history: Vec<String>,
    state: PlayState,
    consume: bool,
    calls: Vec<&'static str>,
}

/// In-memory backend whose history and play state are driven by the test.
pub(crate) struct FakeBackend {
    inner: Mutex<FakeState>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::with_history(0)
    }

    pub(crate) fn with_history(len: usize) -> Self {
        Self {
            inner: Mutex::new(FakeState {
                missing: HashSet::new(),
                add_returns_nothing: false,
                failing: HashSet::new(),
                tracklist: Vec::new(),
                history: (0..len).map(|i| format!("fake:old:{i}")).collect(),
                state: PlayState::Stopped,
                consume: false,
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap()
    }

    /// Searches for `name` return no results.
    pub(crate) fn set_missing(&self, name: &str) {
        self.lock().missing.insert(name.to_string());
    }

    /// `add_tracks` accepts the call but adds nothing.
    pub(crate) fn set_add_returns_nothing(&self, value: bool) {
        self.lock().add_returns_nothing = value;
    }

    /// Make every call to `method` fail.
    pub(crate) fn fail(&self, method: &'static str) {
        self.lock().failing.insert(method);
    }

    pub(crate) fn set_state(&self, state: PlayState) {
        self.lock().state = state;
    }

    /// Simulate `n` more tracks starting to play.
    pub(crate) fn grow_history(&self, n: usize) {
        let mut s = self.lock();
        for _ in 0..n {
            let uri = format!("fake:played:{}", s.history.len());
            s.history.push(uri);
        }
    }

    pub(crate) fn tracklist_uris(&self) -> Vec<String> {
        self.lock().tracklist.iter().map(|t| t.uri.clone()).collect()
    }

    pub(crate) fn consume(&self) -> bool {
        self.lock().consume
    }

    pub(crate) fn state_now(&self) -> PlayState {
        self.lock().state
    }

    pub(crate) fn count(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == method).count()
    }

    fn record(&self, method: &'static str) -> Result<MutexGuard<'_, FakeState>> {
        let mut s = self.lock();
        s.calls.push(method);
        if s.failing.contains(method) {
            return Err(anyhow!("fake backend: {method} failed"));
        }
        Ok(s)
    }
}

#[async_trait]
impl PlaybackBackend for FakeBackend {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let s = self.record("search")?;
        let Some(name) = query.track_name.first() else {
            return Ok(Vec::new());
        };
        if s.missing.contains(name) {
            return Ok(vec![SearchResult { tracks: Vec::new() }]);
        }
        let track = Track {
            uri: format!("fake:track:{name}"),
            name: name.clone(),
            length_ms: Some(180_000),
            artists: query
                .artist
                .iter()
                .map(|a| Artist {
                    uri: String::new(),
                    name: a.clone(),
                })
                .collect(),
        };
        Ok(vec![SearchResult { tracks: vec![track] }])
    }

    async fn add_tracks(&self, tracks: &[Track]) -> Result<Vec<Track>> {
        let mut s = self.record("add_tracks")?;
        if s.add_returns_nothing {
            return Ok(Vec::new());
        }
        s.tracklist.extend(tracks.iter().cloned());
        Ok(tracks.to_vec())
    }

    async fn play(&self) -> Result<()> {
        let mut s = self.record("play")?;
        // Like the real engine, a track enters history as soon as it starts.
        if s.state == PlayState::Stopped {
            if let Some(uri) = s.tracklist.first().map(|t| t.uri.clone()) {
                s.history.push(uri);
            }
        }
        s.state = PlayState::Playing;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.record("pause")?.state = PlayState::Paused;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.record("resume")?.state = PlayState::Playing;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop")?.state = PlayState::Stopped;
        Ok(())
    }

    async fn next(&self) -> Result<()> {
        self.record("next")?;
        Ok(())
    }

    async fn state(&self) -> Result<PlayState> {
        Ok(self.record("state")?.state)
    }

    async fn history(&self) -> Result<Vec<String>> {
        Ok(self.record("history")?.history.clone())
    }

    async fn set_consume(&self, enabled: bool) -> Result<()> {
        self.record("set_consume")?.consume = enabled;
        Ok(())
    }

    async fn clear_tracklist(&self) -> Result<()> {
        self.record("clear_tracklist")?.tracklist.clear();
        Ok(())
    }

    async fn current_track(&self) -> Result<Option<Track>> {
        Ok(self.record("current_track")?.tracklist.first().cloned())
    }
}
