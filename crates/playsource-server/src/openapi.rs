use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::queue::queue_song,
        api::playback::skip_song,
        api::playback::get_playing,
        api::playback::get_play_history,
        api::health::health,
    ),
    components(
        schemas(
            playsource_types::SongRequest,
            playsource_types::SongResponse,
            playsource_types::PlayingResponse,
            api::HealthResponse,
        )
    ),
    tags(
        (name = "playsource-server", description = "Playback broker API")
    )
)]
pub struct ApiDoc;
