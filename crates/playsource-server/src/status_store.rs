//! Now-playing and play-history snapshots.
//!
//! Written by the active playback session, read by the unary API handlers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use playsource_types::SongRequest;

const HISTORY_CAPACITY: usize = 500;

#[derive(Default)]
struct Snapshots {
    now_playing: Option<SongRequest>,
    history: VecDeque<SongRequest>,
}

#[derive(Clone, Default)]
pub struct StatusStore {
    inner: Arc<Mutex<Snapshots>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Snapshots> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Last known now-playing song.
    pub fn now_playing(&self) -> Option<SongRequest> {
        self.lock().now_playing.clone()
    }

    /// Played songs, oldest first.
    pub fn history(&self) -> Vec<SongRequest> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn set_now_playing(&self, song: Option<SongRequest>) {
        self.lock().now_playing = song;
    }

    /// Record a finished song and move now-playing to `next`.
    pub fn on_finished(&self, song: SongRequest, next: Option<SongRequest>) {
        let mut s = self.lock();
        s.history.push_back(song);
        while s.history.len() > HISTORY_CAPACITY {
            s.history.pop_front();
        }
        s.now_playing = next;
    }
}
