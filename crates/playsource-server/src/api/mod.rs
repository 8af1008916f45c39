//! HTTP API handlers.
//!
//! Defines the Actix routes for the queue stream and the unary playback calls.

pub mod health;
pub mod playback;
pub mod queue;

pub use health::HealthResponse;
pub use playback::{get_play_history, get_playing, skip_song};
pub use queue::queue_song;
