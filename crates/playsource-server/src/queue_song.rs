//! Streaming queue handler.
//!
//! Drives one master connection: takes song requests from the client,
//! resolves and admits them against the backend, and reports completions
//! observed by the playback session. Transport independent; the websocket
//! layer feeds `inbound` and drains `outbound`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use playsource_types::{SongRequest, SongResponse};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionCounter;
use crate::backend::{PlayState, PlaybackBackend, SearchQuery, flatten_results};
use crate::lease::{LeaseGuard, MasterLease};
use crate::session::{PlaybackSession, QueueEntry, SessionEvent};
use crate::status_store::StatusStore;

/// Limits applied to every queue session.
#[derive(Clone, Copy, Debug)]
pub struct QueueSettings {
    /// Songs accepted but not yet finished before new songs are rejected.
    pub max_queue_size: usize,
    /// Delay between backend history polls.
    pub poll_interval: Duration,
}

#[derive(Debug)]
pub enum QueueSongError {
    /// Another connection holds the master lease.
    Unavailable,
    /// A backend call failed; the session cannot continue.
    Backend(anyhow::Error),
    /// Session bookkeeping no longer matches what was reported to the client.
    Invariant(String),
}

impl fmt::Display for QueueSongError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueSongError::Unavailable => f.write_str("a master already exists"),
            QueueSongError::Backend(err) => write!(f, "backend failure: {err:#}"),
            QueueSongError::Invariant(msg) => write!(f, "session desynchronized: {msg}"),
        }
    }
}

impl std::error::Error for QueueSongError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueSongError::Backend(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

fn backend_err(op: &'static str) -> impl FnOnce(anyhow::Error) -> QueueSongError {
    move |err| QueueSongError::Backend(err.context(op))
}

/// Whether the session keeps serving after an event.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Closed,
}

enum Wake {
    Shutdown,
    Request(Option<SongRequest>),
    Session(Option<SessionEvent>),
}

/// Take the master lease for a new queue connection.
pub fn acquire_master(lease: &MasterLease) -> Result<LeaseGuard, QueueSongError> {
    lease.try_acquire().ok_or(QueueSongError::Unavailable)
}

#[derive(Clone)]
pub struct QueueSongHandler {
    backend: Arc<dyn PlaybackBackend>,
    status: StatusStore,
    settings: QueueSettings,
}

impl QueueSongHandler {
    pub fn new(backend: Arc<dyn PlaybackBackend>, status: StatusStore, settings: QueueSettings) -> Self {
        Self {
            backend,
            status,
            settings,
        }
    }

    /// Serve one master connection until the client ends the stream, the
    /// connection is cancelled, or the session fails.
    ///
    /// The lease is released on every exit path, including a failed backend reset.
    pub async fn run(
        self,
        mut lease: LeaseGuard,
        mut inbound: mpsc::UnboundedReceiver<SongRequest>,
        outbound: mpsc::UnboundedSender<SongResponse>,
        shutdown: CancellationToken,
    ) -> Result<(), QueueSongError> {
        let mut session = PlaybackSession::start(
            Arc::clone(&self.backend),
            self.status.clone(),
            self.settings.poll_interval,
            shutdown.child_token(),
        )
        .await
        .map_err(QueueSongError::Backend)?;
        let mut admission = AdmissionCounter::new(self.settings.max_queue_size);
        tracing::info!(
            max_queue_size = admission.capacity(),
            poll_interval = ?self.settings.poll_interval,
            "queue: session active"
        );

        let result = self
            .serve(&mut session, &mut admission, &mut inbound, &outbound, &shutdown)
            .await;

        session.shutdown().await;
        lease.release();
        match &result {
            Ok(()) => tracing::info!(in_flight = admission.in_flight(), "queue: session closed"),
            Err(err) => tracing::warn!(error = %err, "queue: session terminated"),
        }
        result
    }

    async fn serve(
        &self,
        session: &mut PlaybackSession,
        admission: &mut AdmissionCounter,
        inbound: &mut mpsc::UnboundedReceiver<SongRequest>,
        outbound: &mpsc::UnboundedSender<SongResponse>,
        shutdown: &CancellationToken,
    ) -> Result<(), QueueSongError> {
        loop {
            let wake = tokio::select! {
                _ = shutdown.cancelled() => Wake::Shutdown,
                request = inbound.recv() => Wake::Request(request),
                event = session.next_event() => Wake::Session(event),
            };

            let flow = match wake {
                Wake::Shutdown => Flow::Closed,
                Wake::Request(Some(request)) => {
                    self.on_request(request, session, admission, outbound).await?
                }
                Wake::Request(None) => {
                    tracing::info!("queue: client ended stream");
                    Flow::Closed
                }
                Wake::Session(Some(SessionEvent::Finished(entry))) => {
                    on_finished(&entry, admission, outbound)?
                }
                Wake::Session(Some(SessionEvent::Anomaly { history_len })) => {
                    tracing::warn!(
                        history_len,
                        in_flight = admission.in_flight(),
                        "queue: backend played a track this session did not queue"
                    );
                    Flow::Continue
                }
                Wake::Session(None) => Flow::Closed,
            };

            if flow == Flow::Closed {
                return Ok(());
            }
        }
    }

    async fn on_request(
        &self,
        request: SongRequest,
        session: &PlaybackSession,
        admission: &mut AdmissionCounter,
        outbound: &mpsc::UnboundedSender<SongResponse>,
    ) -> Result<Flow, QueueSongError> {
        let song_id = request.id;
        if session.is_shutting_down() {
            tracing::debug!(song_id, "queue: request after shutdown dropped");
            return Ok(Flow::Closed);
        }
        tracing::debug!(song_id, name = %request.name, artists = ?request.artists, "queue: song requested");

        let query = SearchQuery::for_song(&request.name, &request.artists);
        // Mopidy answers an empty query with every track in the library.
        if query.is_empty() {
            tracing::info!(song_id, "queue: request names no track or artist");
            return Ok(send(outbound, SongResponse::NotFound { song_id }));
        }
        let results = self
            .backend
            .search(&query)
            .await
            .map_err(backend_err("search"))?;
        // First hit wins; no ranking.
        let Some(track) = flatten_results(results).into_iter().next() else {
            tracing::info!(song_id, name = %request.name, "queue: song not found");
            return Ok(send(outbound, SongResponse::NotFound { song_id }));
        };

        if !admission.has_capacity() {
            tracing::info!(
                song_id,
                in_flight = admission.in_flight(),
                "queue: admission limit reached"
            );
            return Ok(send(outbound, SongResponse::Rejected { song_id }));
        }

        let added = self
            .backend
            .add_tracks(std::slice::from_ref(&track))
            .await
            .map_err(backend_err("add track"))?;
        if added.is_empty() {
            tracing::info!(song_id, uri = %track.uri, "queue: backend refused track");
            return Ok(send(outbound, SongResponse::NotFound { song_id }));
        }

        session.push(QueueEntry { request, track });
        tracing::info!(song_id, queued = session.queue_len(), "queue: song accepted");
        match self.backend.state().await.map_err(backend_err("read play state"))? {
            PlayState::Stopped => self.backend.play().await.map_err(backend_err("play"))?,
            PlayState::Paused => self.backend.resume().await.map_err(backend_err("resume"))?,
            PlayState::Playing | PlayState::Unknown => {}
        }
        admission.admit();
        Ok(send(outbound, SongResponse::Accepted { song_id }))
    }
}

fn on_finished(
    entry: &QueueEntry,
    admission: &mut AdmissionCounter,
    outbound: &mpsc::UnboundedSender<SongResponse>,
) -> Result<Flow, QueueSongError> {
    let song_id = entry.request.id;
    admission
        .release()
        .map_err(|err| QueueSongError::Invariant(format!("song {song_id} finished: {err}")))?;
    Ok(send(outbound, SongResponse::Finished { song_id }))
}

fn send(outbound: &mpsc::UnboundedSender<SongResponse>, response: SongResponse) -> Flow {
    match outbound.send(response) {
        Ok(()) => Flow::Continue,
        Err(err) => {
            tracing::debug!(song_id = err.0.song_id(), "queue: client gone before response");
            Flow::Closed
        }
    }
}
