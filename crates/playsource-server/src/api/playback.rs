//! Playback-related API handlers.

use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{Error, HttpResponse, Responder, get, post, web};
use futures_util::stream;
use playsource_types::PlayingResponse;

use crate::state::AppState;

fn sse_event(event: &str, data: &str) -> Bytes {
    let mut payload = String::new();
    payload.push_str("event: ");
    payload.push_str(event);
    payload.push('\n');
    for line in data.lines() {
        payload.push_str("data: ");
        payload.push_str(line);
        payload.push('\n');
    }
    payload.push('\n');
    Bytes::from(payload)
}

#[utoipa::path(
    post,
    path = "/skip",
    responses(
        (status = 200, description = "Advanced to the next track"),
        (status = 500, description = "Backend failure")
    )
)]
#[post("/skip")]
/// Advance the backend to the next track.
pub async fn skip_song(state: web::Data<AppState>) -> impl Responder {
    match state.backend.current_track().await {
        Ok(Some(track)) => tracing::info!(uri = %track.uri, name = %track.name, "skip request"),
        Ok(None) => tracing::info!("skip request with nothing playing"),
        Err(err) => tracing::warn!(error = %format!("{err:#}"), "skip request: current track unknown"),
    }
    match state.backend.next().await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "skip failed");
            HttpResponse::InternalServerError().body(format!("{err:#}"))
        }
    }
}

#[utoipa::path(
    get,
    path = "/playing",
    responses(
        (status = 200, description = "Song currently at the head of the session queue", body = PlayingResponse)
    )
)]
#[get("/playing")]
/// Return the now-playing snapshot.
pub async fn get_playing(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(PlayingResponse {
        song: state.status.now_playing(),
    })
}

#[utoipa::path(
    get,
    path = "/history",
    responses(
        (status = 200, description = "Server-sent `song` events, oldest first; the stream ends after the last entry")
    )
)]
#[get("/history")]
/// Stream the play history snapshot.
pub async fn get_play_history(state: web::Data<AppState>) -> impl Responder {
    let history = state.status.history();
    tracing::debug!(entries = history.len(), "history request");
    let events: Vec<Result<Bytes, Error>> = history
        .iter()
        .filter_map(|song| match serde_json::to_string(song) {
            Ok(json) => Some(Ok(sse_event("song", &json))),
            Err(err) => {
                tracing::warn!(song_id = song.id, error = %err, "encode history entry failed");
                None
            }
        })
        .collect();

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream::iter(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_event_frames_each_line() {
        let bytes = sse_event("song", "{\"id\":1}");
        assert_eq!(&bytes[..], b"event: song\ndata: {\"id\":1}\n\n");
    }
}
