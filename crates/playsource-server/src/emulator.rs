//! In-process stand-in for the playback engine.
//!
//! Used in test mode so the server can be exercised without a real backend.
//! Tracks play for a fixed length; paused time does not count. Searches can
//! be made to miss at random so clients see `not_found` answers.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;

use crate::backend::{Artist, PlayState, PlaybackBackend, SearchQuery, SearchResult, Track};

struct Current {
    track: Track,
    /// Playing time accumulated before the last resume.
    played: Duration,
    /// Set while playing.
    resumed_at: Option<Instant>,
}

impl Current {
    fn elapsed(&self, now: Instant) -> Duration {
        self.played + self.resumed_at.map(|at| now - at).unwrap_or_default()
    }
}

struct EmulatorState {
    consume: bool,
    tracklist: VecDeque<Track>,
    current: Option<Current>,
    history: Vec<String>,
    next_track_id: u64,
}

pub struct EmulatedBackend {
    song_length: Duration,
    not_found_probability: f64,
    inner: Mutex<EmulatorState>,
}

impl EmulatedBackend {
    pub fn new(song_length: Duration) -> Self {
        Self {
            song_length,
            not_found_probability: 0.0,
            inner: Mutex::new(EmulatorState {
                consume: false,
                tracklist: VecDeque::new(),
                current: None,
                history: Vec::new(),
                next_track_id: 0,
            }),
        }
    }

    /// Make each search miss with the given probability, clamped to `0.0..=1.0`.
    pub fn with_not_found_probability(mut self, probability: f64) -> Self {
        self.not_found_probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    fn roll_not_found(&self) -> bool {
        self.not_found_probability > 0.0 && rand::thread_rng().gen_bool(self.not_found_probability)
    }

    /// Lock state and apply any track changes due by `now`.
    fn advance(&self, now: Instant) -> MutexGuard<'_, EmulatorState> {
        let mut s = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        loop {
            let Some(current) = s.current.as_ref() else { break };
            let Some(resumed_at) = current.resumed_at else { break };
            let elapsed = current.elapsed(now);
            if elapsed < self.song_length {
                break;
            }
            // Carry the overshoot into the next track.
            let ended_at = now - (elapsed - self.song_length);
            let finished = s.current.take().map(|c| c.track);
            if !s.consume {
                if let Some(track) = finished {
                    s.tracklist.push_back(track);
                }
            }
            start_next(&mut s, ended_at.max(resumed_at));
        }
        s
    }
}

/// Start the head of the tracklist, recording it in history.
fn start_next(s: &mut EmulatorState, at: Instant) -> bool {
    match s.tracklist.pop_front() {
        Some(track) => {
            s.history.push(track.uri.clone());
            s.current = Some(Current {
                track,
                played: Duration::ZERO,
                resumed_at: Some(at),
            });
            true
        }
        None => {
            s.current = None;
            false
        }
    }
}

#[async_trait]
impl PlaybackBackend for EmulatedBackend {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let Some(name) = query.track_name.first().filter(|n| !n.trim().is_empty()) else {
            return Ok(Vec::new());
        };
        if self.roll_not_found() {
            tracing::debug!(name = %name, "emulator: search miss");
            return Ok(Vec::new());
        }
        let mut s = self.advance(Instant::now());
        let id = s.next_track_id;
        s.next_track_id += 1;
        let track = Track {
            uri: format!("emulator:track:{id}"),
            name: name.clone(),
            length_ms: Some(u64::try_from(self.song_length.as_millis()).unwrap_or(u64::MAX)),
            artists: query
                .artist
                .iter()
                .map(|name| Artist {
                    uri: String::new(),
                    name: name.clone(),
                })
                .collect(),
        };
        Ok(vec![SearchResult { tracks: vec![track] }])
    }

    async fn add_tracks(&self, tracks: &[Track]) -> Result<Vec<Track>> {
        let mut s = self.advance(Instant::now());
        s.tracklist.extend(tracks.iter().cloned());
        Ok(tracks.to_vec())
    }

    async fn play(&self) -> Result<()> {
        let now = Instant::now();
        let mut s = self.advance(now);
        match s.current.as_mut() {
            Some(current) if current.resumed_at.is_none() => current.resumed_at = Some(now),
            Some(_) => {}
            None => {
                start_next(&mut s, now);
            }
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let now = Instant::now();
        let mut s = self.advance(now);
        if let Some(current) = s.current.as_mut() {
            if current.resumed_at.is_some() {
                current.played = current.elapsed(now);
                current.resumed_at = None;
            }
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let now = Instant::now();
        let mut s = self.advance(now);
        if let Some(current) = s.current.as_mut() {
            if current.resumed_at.is_none() {
                current.resumed_at = Some(now);
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut s = self.advance(Instant::now());
        // A stopped track stays on the tracklist and restarts from the top.
        if let Some(current) = s.current.take() {
            s.tracklist.push_front(current.track);
        }
        Ok(())
    }

    async fn next(&self) -> Result<()> {
        let now = Instant::now();
        let mut s = self.advance(now);
        if let Some(current) = s.current.take() {
            let was_playing = current.resumed_at.is_some();
            if !s.consume {
                s.tracklist.push_back(current.track);
            }
            if start_next(&mut s, now) && !was_playing {
                if let Some(next) = s.current.as_mut() {
                    next.resumed_at = None;
                }
            }
        }
        Ok(())
    }

    async fn state(&self) -> Result<PlayState> {
        let s = self.advance(Instant::now());
        Ok(match s.current.as_ref() {
            None => PlayState::Stopped,
            Some(current) if current.resumed_at.is_some() => PlayState::Playing,
            Some(_) => PlayState::Paused,
        })
    }

    async fn history(&self) -> Result<Vec<String>> {
        Ok(self.advance(Instant::now()).history.clone())
    }

    async fn set_consume(&self, enabled: bool) -> Result<()> {
        self.advance(Instant::now()).consume = enabled;
        Ok(())
    }

    async fn clear_tracklist(&self) -> Result<()> {
        let mut s = self.advance(Instant::now());
        s.tracklist.clear();
        s.current = None;
        Ok(())
    }

    async fn current_track(&self) -> Result<Option<Track>> {
        let s = self.advance(Instant::now());
        Ok(s.current.as_ref().map(|c| c.track.clone()))
    }
}
