use serde::{Deserialize, Serialize};

/// A song a client wants played.
///
/// `id` is assigned by the caller and echoed back in every [`SongResponse`]
/// about this song. It only has to be unique within one queue connection's
/// in-flight window.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SongRequest {
    /// Caller-assigned song id.
    pub id: i64,
    /// Track title used as the search term.
    pub name: String,
    /// Artist names used as additional search terms, in order.
    #[serde(default)]
    pub artists: Vec<String>,
}

/// Outcome reported for a queued song.
///
/// Every request yields exactly one of `NotFound`, `Rejected` or `Accepted`
/// immediately, and every `Accepted` song later yields exactly one `Finished`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SongResponse {
    /// The backend could not resolve the song to a playable track.
    NotFound { song_id: i64 },
    /// The song resolved but too many songs are already outstanding.
    Rejected { song_id: i64 },
    /// The song was added to the backend tracklist.
    Accepted { song_id: i64 },
    /// A previously accepted song finished playing.
    Finished { song_id: i64 },
}

impl SongResponse {
    /// Id of the song this response is about.
    pub fn song_id(&self) -> i64 {
        match *self {
            SongResponse::NotFound { song_id }
            | SongResponse::Rejected { song_id }
            | SongResponse::Accepted { song_id }
            | SongResponse::Finished { song_id } => song_id,
        }
    }
}

/// Currently playing song as last observed by the server.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PlayingResponse {
    /// `None` until something has been queued and started.
    pub song: Option<SongRequest>,
}
