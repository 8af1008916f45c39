//! Actix server startup + app wiring.
//!
//! Resolves settings, picks the playback backend, and serves the routes,
//! middleware and OpenAPI endpoints.

use std::sync::Arc;
use std::time::Duration;

use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::backend::PlaybackBackend;
use crate::config::{self, Settings};
use crate::emulator::EmulatedBackend;
use crate::mopidy::MopidyClient;
use crate::openapi;
use crate::state::AppState;
use crate::systemd;

const BACKEND_WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// Build server state and start the Actix HTTP server.
pub(crate) async fn run(args: crate::Args) -> Result<()> {
    let cfg = config::load_config(args.config.as_ref())?;
    let settings = config::resolve(&cfg, &args.overrides())?;
    tracing::info!(
        version = crate::VERSION,
        bind = %settings.bind,
        mopidy_url = %settings.mopidy_url,
        test = settings.test,
        max_queue_size = settings.queue.max_queue_size,
        poll_interval = ?settings.queue.poll_interval,
        "starting playsource-server"
    );

    let backend = build_backend(&settings)?;
    if settings.service_mode {
        if let Some(url) = backend.endpoint() {
            systemd::wait_for_backend(url, BACKEND_WAIT_INTERVAL).await?;
        }
    }

    let state = web::Data::new(AppState::new(backend, settings.queue));
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default().exclude("/playing").exclude("/health"))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::queue_song)
            .service(api::skip_song)
            .service(api::get_playing)
            .service(api::get_play_history)
            .service(api::health::health)
    })
    .bind(settings.bind)
    .with_context(|| format!("bind {}", settings.bind))?
    .run();

    tracing::info!(bind = %settings.bind, "listening");
    if settings.service_mode {
        systemd::notify_logged("READY=1");
    }
    server.await.context("http server")?;
    if settings.service_mode {
        systemd::notify_logged("STOPPING=1");
    }
    Ok(())
}

/// Pick the emulator in test mode, otherwise the Mopidy client.
fn build_backend(settings: &Settings) -> Result<Arc<dyn PlaybackBackend>> {
    if settings.test {
        tracing::info!(
            song_length_secs = settings.song_length.as_secs(),
            not_found_probability = settings.not_found_probability,
            "test mode: using emulated backend"
        );
        let emulator = EmulatedBackend::new(settings.song_length)
            .with_not_found_probability(settings.not_found_probability);
        return Ok(Arc::new(emulator));
    }
    let client = MopidyClient::new(&settings.mopidy_url)?;
    Ok(Arc::new(client))
}
