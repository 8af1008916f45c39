//! Playback session and history reconciliation.
//!
//! A session owns the backend for one master connection. It resets the
//! backend to a blank tracklist, keeps a FIFO of the songs it handed to the
//! backend, and polls backend history to decide when those songs finished.
//!
//! A track enters backend history the moment it starts playing, so the
//! expected history length starts one above what the backend reports at
//! session start. While the backend is idle the observed length stays one
//! below the expectation.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use playsource_types::SongRequest;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{PlayState, PlaybackBackend, Track};
use crate::status_store::StatusStore;

/// A song accepted by the backend, waiting to finish.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub request: SongRequest,
    pub track: Track,
}

/// Output of the reconciliation loop, in queue order.
#[derive(Debug)]
pub enum SessionEvent {
    /// The entry at the head of the queue finished playing.
    Finished(QueueEntry),
    /// History advanced but no queued entry was waiting. The increment is dropped.
    Anomaly { history_len: usize },
}

type SharedQueue = Arc<Mutex<VecDeque<QueueEntry>>>;

fn lock_queue(queue: &SharedQueue) -> MutexGuard<'_, VecDeque<QueueEntry>> {
    queue.lock().unwrap_or_else(|err| err.into_inner())
}

pub struct PlaybackSession {
    queue: SharedQueue,
    status: StatusStore,
    shutdown: CancellationToken,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    monitor: Option<JoinHandle<()>>,
}

impl PlaybackSession {
    /// Reset the backend and start the reconciliation loop.
    ///
    /// Must only be called while holding the master lease. Any backend
    /// failure aborts creation; no loop is left running in that case.
    pub async fn start(
        backend: Arc<dyn PlaybackBackend>,
        status: StatusStore,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        backend
            .set_consume(true)
            .await
            .context("enable consume mode")?;
        backend
            .clear_tracklist()
            .await
            .context("clear tracklist")?;
        backend.stop().await.context("stop playback")?;
        let initial_len = backend
            .history()
            .await
            .context("read initial history")?
            .len();
        tracing::info!(history_len = initial_len, "session: backend reset");

        let queue: SharedQueue = Arc::new(Mutex::new(VecDeque::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let reconciler = Reconciler {
            backend,
            queue: Arc::clone(&queue),
            status: status.clone(),
            events: tx,
            expected_len: initial_len + 1,
        };
        let monitor = tokio::spawn(reconciler.run(poll_interval, shutdown.clone()));

        Ok(Self {
            queue,
            status,
            shutdown,
            events: rx,
            monitor: Some(monitor),
        })
    }

    /// Track a song the caller already added to the backend tracklist.
    ///
    /// Silently dropped once the session is shutting down.
    pub fn push(&self, entry: QueueEntry) {
        if self.shutdown.is_cancelled() {
            tracing::debug!(song_id = entry.request.id, "session: push after shutdown ignored");
            return;
        }
        let mut queue = lock_queue(&self.queue);
        if queue.is_empty() {
            self.status.set_now_playing(Some(entry.request.clone()));
        }
        queue.push_back(entry);
    }

    /// Next completion or diagnostic event. `None` once the loop has exited
    /// and every buffered event was consumed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn queue_len(&self) -> usize {
        lock_queue(&self.queue).len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Signal shutdown. Safe to call any number of times.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Signal shutdown, wait for the reconciliation loop to exit, then clear
    /// now-playing.
    ///
    /// The loop may still be finishing a song when the signal lands, so
    /// now-playing is only cleared once it can no longer write to the store.
    /// This also covers a token cancelled by the parent.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(monitor) = self.monitor.take() {
            if let Err(err) = monitor.await {
                tracing::warn!(error = %err, "session: reconciliation task failed");
            }
        }
        self.status.set_now_playing(None);
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.close();
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
            self.status.set_now_playing(None);
        }
    }
}

struct Reconciler {
    backend: Arc<dyn PlaybackBackend>,
    queue: SharedQueue,
    status: StatusStore,
    events: mpsc::UnboundedSender<SessionEvent>,
    expected_len: usize,
}

impl Reconciler {
    async fn run(mut self, poll_interval: Duration, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.poll() => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "session: history poll failed");
                    }
                }
            }
        }
        tracing::debug!("session: reconciliation loop stopped");
    }

    /// Compare backend history with the expected length and emit completions.
    async fn poll(&mut self) -> Result<()> {
        let len = self
            .backend
            .history()
            .await
            .context("read history")?
            .len();
        match len.cmp(&self.expected_len) {
            Ordering::Less => {
                tracing::trace!(
                    history_len = len,
                    expected = self.expected_len,
                    "session: backend idle"
                );
            }
            Ordering::Equal => {
                let state = self.backend.state().await.context("read play state")?;
                // The last track can end without anything new entering history.
                if state == PlayState::Stopped {
                    self.finish_head(len);
                    self.expected_len += 1;
                }
            }
            Ordering::Greater => {
                for _ in self.expected_len..len {
                    self.finish_head(len);
                }
                self.expected_len = len;
            }
        }
        Ok(())
    }

    fn finish_head(&mut self, history_len: usize) {
        let (finished, next) = {
            let mut queue = lock_queue(&self.queue);
            let finished = queue.pop_front();
            (finished, queue.front().map(|e| e.request.clone()))
        };
        let event = match finished {
            Some(entry) => {
                tracing::info!(song_id = entry.request.id, uri = %entry.track.uri, "session: song finished");
                self.status.on_finished(entry.request.clone(), next);
                SessionEvent::Finished(entry)
            }
            None => {
                tracing::warn!(
                    history_len,
                    expected = self.expected_len,
                    "session: history advanced with nothing queued"
                );
                SessionEvent::Anomaly { history_len }
            }
        };
        // The receiver is gone only when the session itself was dropped.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    const SLOW_POLL: Duration = Duration::from_secs(3600);

    fn entry(id: i64) -> QueueEntry {
        QueueEntry {
            request: SongRequest {
                id,
                name: format!("song {id}"),
                artists: vec!["artist".to_string()],
            },
            track: Track {
                uri: format!("fake:track:{id}"),
                ..Track::default()
            },
        }
    }

    fn reconciler(
        backend: Arc<FakeBackend>,
        expected_len: usize,
    ) -> (Reconciler, SharedQueue, mpsc::UnboundedReceiver<SessionEvent>) {
        let queue: SharedQueue = Arc::new(Mutex::new(VecDeque::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let reconciler = Reconciler {
            backend,
            queue: Arc::clone(&queue),
            status: StatusStore::new(),
            events: tx,
            expected_len,
        };
        (reconciler, queue, rx)
    }

    fn finished_ids(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<i64> {
        let mut ids = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Finished(entry) = event {
                ids.push(entry.request.id);
            }
        }
        ids
    }

    #[actix_web::test]
    async fn start_resets_backend() {
        let backend = Arc::new(FakeBackend::with_history(4));
        backend.set_state(PlayState::Playing);
        let session = PlaybackSession::start(
            backend.clone(),
            StatusStore::new(),
            SLOW_POLL,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(backend.consume());
        assert_eq!(backend.state_now(), PlayState::Stopped);
        assert_eq!(backend.count("clear_tracklist"), 1);
        assert_eq!(session.queue_len(), 0);
        session.shutdown().await;
    }

    #[actix_web::test]
    async fn start_propagates_backend_failure() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail("clear_tracklist");
        let result = PlaybackSession::start(
            backend.clone(),
            StatusStore::new(),
            SLOW_POLL,
            CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(backend.count("stop"), 0);
        assert_eq!(backend.count("history"), 0);
    }

    #[actix_web::test]
    async fn history_growth_finishes_entries_in_queue_order() {
        let backend = Arc::new(FakeBackend::new());
        let (mut reconciler, queue, mut rx) = reconciler(backend.clone(), 1);
        lock_queue(&queue).extend([entry(10), entry(11), entry(12)]);

        // First track started: history 0 -> 1 meets the expectation.
        backend.grow_history(1);
        backend.set_state(PlayState::Playing);
        reconciler.poll().await.unwrap();
        assert!(finished_ids(&mut rx).is_empty());

        // Two more tracks started since the last poll.
        backend.grow_history(2);
        reconciler.poll().await.unwrap();

        assert_eq!(finished_ids(&mut rx), [10, 11]);
        assert_eq!(lock_queue(&queue).len(), 1);
        assert_eq!(reconciler.expected_len, 3);
    }

    #[actix_web::test]
    async fn stopped_at_expected_length_finishes_last_song() {
        let backend = Arc::new(FakeBackend::with_history(1));
        let (mut reconciler, queue, mut rx) = reconciler(backend.clone(), 1);
        lock_queue(&queue).push_back(entry(1));
        backend.set_state(PlayState::Stopped);

        reconciler.poll().await.unwrap();

        assert_eq!(finished_ids(&mut rx), [1]);
        assert_eq!(reconciler.expected_len, 2);

        // Idle afterwards: history is one below expectation, nothing happens.
        reconciler.poll().await.unwrap();
        assert!(finished_ids(&mut rx).is_empty());
        assert_eq!(backend.count("state"), 1);
    }

    #[actix_web::test]
    async fn playing_at_expected_length_is_left_alone() {
        let backend = Arc::new(FakeBackend::with_history(1));
        let (mut reconciler, queue, mut rx) = reconciler(backend.clone(), 1);
        lock_queue(&queue).push_back(entry(1));
        backend.set_state(PlayState::Playing);

        reconciler.poll().await.unwrap();

        assert!(finished_ids(&mut rx).is_empty());
        assert_eq!(lock_queue(&queue).len(), 1);
    }

    #[actix_web::test]
    async fn shrinking_history_changes_nothing() {
        let backend = Arc::new(FakeBackend::with_history(2));
        let (mut reconciler, queue, mut rx) = reconciler(backend.clone(), 5);
        lock_queue(&queue).push_back(entry(1));

        reconciler.poll().await.unwrap();

        assert!(finished_ids(&mut rx).is_empty());
        assert_eq!(lock_queue(&queue).len(), 1);
        assert_eq!(reconciler.expected_len, 5);
        assert_eq!(backend.count("state"), 0);
    }

    #[actix_web::test]
    async fn growth_with_empty_queue_reports_anomaly_without_blocking() {
        let backend = Arc::new(FakeBackend::with_history(3));
        let (mut reconciler, _queue, mut rx) = reconciler(backend.clone(), 1);

        reconciler.poll().await.unwrap();

        let mut anomalies = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, SessionEvent::Anomaly { history_len: 3 }));
            anomalies += 1;
        }
        assert_eq!(anomalies, 2);
        assert_eq!(reconciler.expected_len, 3);
    }

    #[actix_web::test]
    async fn finished_song_moves_now_playing_to_next_entry() {
        let backend = Arc::new(FakeBackend::new());
        let (mut reconciler, queue, _rx) = reconciler(backend.clone(), 1);
        let status = reconciler.status.clone();
        lock_queue(&queue).extend([entry(1), entry(2)]);

        backend.grow_history(2);
        reconciler.poll().await.unwrap();

        assert_eq!(status.now_playing().map(|s| s.id), Some(2));
        assert_eq!(status.history().len(), 1);
    }

    #[actix_web::test]
    async fn poll_failure_is_reported_and_state_kept() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail("history");
        let (mut reconciler, queue, _rx) = reconciler(backend.clone(), 1);
        lock_queue(&queue).push_back(entry(1));

        assert!(reconciler.poll().await.is_err());
        assert_eq!(lock_queue(&queue).len(), 1);
        assert_eq!(reconciler.expected_len, 1);
    }

    #[actix_web::test]
    async fn loop_delivers_completions_through_session() {
        let backend = Arc::new(FakeBackend::new());
        let mut session = PlaybackSession::start(
            backend.clone(),
            StatusStore::new(),
            Duration::from_millis(10),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        session.push(entry(1));
        session.push(entry(2));
        backend.set_state(PlayState::Playing);
        backend.grow_history(2);

        let event = tokio::time::timeout(Duration::from_secs(2), session.next_event())
            .await
            .expect("completion in time");
        assert!(matches!(event, Some(SessionEvent::Finished(ref e)) if e.request.id == 1));
        assert_eq!(session.queue_len(), 1);
        session.shutdown().await;
    }

    #[actix_web::test]
    async fn shutdown_is_idempotent_and_prompt() {
        let backend = Arc::new(FakeBackend::new());
        let session = PlaybackSession::start(
            backend,
            StatusStore::new(),
            SLOW_POLL,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        session.close();
        session.close();
        assert!(session.is_shutting_down());
        tokio::time::timeout(Duration::from_secs(1), session.shutdown())
            .await
            .expect("loop exits without waiting for the poll timer");
    }

    #[actix_web::test]
    async fn parent_cancellation_stops_the_session() {
        let parent = CancellationToken::new();
        let mut session = PlaybackSession::start(
            Arc::new(FakeBackend::new()),
            StatusStore::new(),
            SLOW_POLL,
            parent.child_token(),
        )
        .await
        .unwrap();

        parent.cancel();
        let event = tokio::time::timeout(Duration::from_secs(1), session.next_event())
            .await
            .expect("event channel closes");
        assert!(event.is_none());
    }

    #[actix_web::test]
    async fn shutdown_after_parent_cancellation_clears_now_playing() {
        let parent = CancellationToken::new();
        let status = StatusStore::new();
        let session = PlaybackSession::start(
            Arc::new(FakeBackend::new()),
            status.clone(),
            SLOW_POLL,
            parent.child_token(),
        )
        .await
        .unwrap();
        session.push(entry(1));
        assert_eq!(status.now_playing().map(|s| s.id), Some(1));

        parent.cancel();
        assert!(session.is_shutting_down());
        session.shutdown().await;

        assert!(status.now_playing().is_none());
    }

    #[actix_web::test]
    async fn dropped_session_clears_now_playing() {
        let status = StatusStore::new();
        let session = PlaybackSession::start(
            Arc::new(FakeBackend::new()),
            status.clone(),
            SLOW_POLL,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        session.push(entry(1));

        drop(session);

        assert!(status.now_playing().is_none());
    }

    #[actix_web::test]
    async fn push_after_shutdown_is_ignored() {
        let session = PlaybackSession::start(
            Arc::new(FakeBackend::new()),
            StatusStore::new(),
            SLOW_POLL,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        session.close();
        session.push(entry(1));
        assert_eq!(session.queue_len(), 0);
    }
}
