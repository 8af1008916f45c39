//! Queue websocket API.
//!
//! One master connection at a time streams song requests in and receives
//! accepted / rejected / finished notifications back.

use actix::prelude::*;
use actix_web::http::StatusCode;
use actix_web::{Error, HttpRequest, HttpResponse, ResponseError, get, web};
use actix_web_actors::ws;
use futures_util::{StreamExt, stream};
use playsource_types::{SongRequest, SongResponse};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::lease::LeaseGuard;
use crate::queue_song::{QueueSongError, QueueSongHandler, acquire_master};
use crate::state::AppState;

/// Close frame payloads are capped at 125 bytes including the 2-byte code.
const MAX_CLOSE_DESCRIPTION: usize = 123;

impl ResponseError for QueueSongError {
    fn status_code(&self) -> StatusCode {
        match self {
            QueueSongError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            QueueSongError::Backend(_) | QueueSongError::Invariant(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Close frame ending the websocket for a finished session.
pub(crate) fn close_reason(result: &Result<(), QueueSongError>) -> ws::CloseReason {
    let err = match result {
        Ok(()) => return ws::CloseCode::Normal.into(),
        Err(err) => err,
    };
    let code = match err {
        QueueSongError::Unavailable => ws::CloseCode::Again,
        QueueSongError::Backend(_) | QueueSongError::Invariant(_) => ws::CloseCode::Error,
    };
    let mut description = err.to_string();
    if description.len() > MAX_CLOSE_DESCRIPTION {
        let mut end = MAX_CLOSE_DESCRIPTION;
        while !description.is_char_boundary(end) {
            end -= 1;
        }
        description.truncate(end);
    }
    ws::CloseReason {
        code,
        description: Some(description),
    }
}

/// Events forwarded from the session task to the websocket actor.
enum Outbound {
    Response(SongResponse),
    Closed(ws::CloseReason),
}

pub struct QueueSongWs {
    conn_id: Uuid,
    pending: Option<(QueueSongHandler, LeaseGuard)>,
    requests: Option<mpsc::UnboundedSender<SongRequest>>,
    shutdown: CancellationToken,
}

impl QueueSongWs {
    pub fn new(handler: QueueSongHandler, lease: LeaseGuard) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            pending: Some((handler, lease)),
            requests: None,
            shutdown: CancellationToken::new(),
        }
    }

    fn on_text(&mut self, text: &str) {
        let request = match serde_json::from_str::<SongRequest>(text) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(conn = %self.conn_id, error = %err, "queue: ignoring malformed frame");
                return;
            }
        };
        if let Some(requests) = self.requests.as_ref() {
            if requests.send(request).is_err() {
                tracing::debug!(conn = %self.conn_id, "queue: session already finished");
            }
        }
    }

    /// End the inbound stream; the session drains and closes the socket.
    fn end_requests(&mut self) {
        if self.requests.take().is_some() {
            tracing::info!(conn = %self.conn_id, "queue: client closed stream");
        }
    }
}

impl Actor for QueueSongWs {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let Some((handler, lease)) = self.pending.take() else { return };
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        self.requests = Some(req_tx);

        let span = tracing::info_span!("queue", conn = %self.conn_id);
        let shutdown = self.shutdown.clone();
        actix_web::rt::spawn(
            async move {
                tracing::info!("queue: master connected");
                let result = handler.run(lease, req_rx, resp_tx, shutdown).await;
                let _ = done_tx.send(close_reason(&result));
            }
            .instrument(span),
        );

        // Responses first, then the close frame once the session has ended.
        let responses = stream::unfold(resp_rx, |mut rx| async move {
            rx.recv().await.map(|resp| (Outbound::Response(resp), rx))
        });
        let closed = stream::once(done_rx).filter_map(|done| async move {
            done.ok().map(Outbound::Closed)
        });
        ctx.add_stream(responses.chain(closed));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.requests.take();
        self.shutdown.cancel();
        tracing::debug!(conn = %self.conn_id, "queue: websocket stopped");
    }
}

impl StreamHandler<Outbound> for QueueSongWs {
    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Response(resp) => match serde_json::to_string(&resp) {
                Ok(text) => ctx.text(text),
                Err(err) => {
                    tracing::warn!(conn = %self.conn_id, error = %err, "queue: encode response failed")
                }
            },
            Outbound::Closed(reason) => {
                tracing::info!(conn = %self.conn_id, code = ?reason.code, "queue: closing websocket");
                ctx.close(Some(reason));
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for QueueSongWs {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match item {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(conn = %self.conn_id, error = %err, "queue: websocket protocol error");
                ctx.stop();
                return;
            }
        };
        match msg {
            ws::Message::Text(text) => self.on_text(&text),
            ws::Message::Ping(bytes) => ctx.pong(&bytes),
            ws::Message::Pong(_) => {}
            ws::Message::Close(_) => self.end_requests(),
            ws::Message::Binary(_) => {
                tracing::warn!(conn = %self.conn_id, "queue: ignoring binary frame");
            }
            ws::Message::Continuation(_) => ctx.stop(),
            ws::Message::Nop => {}
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // Peer went away without a close frame; let the session drain.
        self.end_requests();
    }
}

#[utoipa::path(
    get,
    path = "/queue",
    responses(
        (status = 101, description = "Websocket stream of SongRequest in, SongResponse out"),
        (status = 503, description = "A master already exists")
    )
)]
#[get("/queue")]
/// Open the master queue stream.
pub async fn queue_song(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let lease = acquire_master(&state.lease).inspect_err(|_| {
        tracing::info!("queue: refusing connection, master already active");
    })?;
    ws::start(QueueSongWs::new(state.queue_handler(), lease), &req, stream)
}
