//! Shared application state.
//!
//! Holds the backend client, the master lease and the status snapshots
//! read by the unary handlers.

use std::sync::Arc;

use crate::backend::PlaybackBackend;
use crate::lease::MasterLease;
use crate::queue_song::{QueueSettings, QueueSongHandler};
use crate::status_store::StatusStore;

/// Shared application state for Actix handlers.
pub struct AppState {
    /// Playback engine client (Mopidy or the emulator).
    pub backend: Arc<dyn PlaybackBackend>,
    /// Held by the single active queue connection.
    pub lease: MasterLease,
    /// Now-playing and history snapshots.
    pub status: StatusStore,
    /// Limits applied to each queue session.
    pub queue_settings: QueueSettings,
}

impl AppState {
    pub fn new(backend: Arc<dyn PlaybackBackend>, queue_settings: QueueSettings) -> Self {
        Self {
            backend,
            lease: MasterLease::new(),
            status: StatusStore::new(),
            queue_settings,
        }
    }

    /// Handler for a new queue connection, sharing this state's backend and snapshots.
    pub fn queue_handler(&self) -> QueueSongHandler {
        QueueSongHandler::new(
            Arc::clone(&self.backend),
            self.status.clone(),
            self.queue_settings,
        )
    }
}
