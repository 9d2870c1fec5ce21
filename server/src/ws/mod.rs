//! WebSocket transport for continuous liveness updates.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /api/status-stream?host=<host>&token=<api_key>`.
//!    The token and host are validated before the upgrade completes.
//! 2. The server starts one continuous probe for the connection and sends a
//!    text frame `{"is_online": bool}` on every probe tick.
//! 3. The probe stops when the client closes, the socket breaks, or the probe
//!    fails. A failure is reported with one `{"error", "code"}` frame before
//!    the server closes the socket.
//!
//! Incoming client messages other than `Close` are ignored.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::address::validate_host;
use crate::error::ActionError;
use crate::routes::{error_response, StatusData};
use crate::{AppState, Command, Outcome, Target};

/// Query parameters for the WebSocket upgrade request.
#[derive(Deserialize)]
pub struct StreamQuery {
    /// API key passed as a query parameter (since HTTP headers aren't available
    /// during a browser WebSocket upgrade).
    pub token: String,
    /// Host to probe.
    pub host: String,
}

/// `GET /api/status-stream?host=<host>&token=<key>`: WebSocket upgrade handler.
///
/// Returns `403 Forbidden` on a bad token and `400` on a malformed host.
pub async fn status_stream_upgrade(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !crate::auth::constant_time_eq(state.config.auth.api_key.as_bytes(), query.token.as_bytes())
    {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Invalid API key", "code": "FORBIDDEN"})),
        )
            .into_response();
    }
    if let Err(e) = validate_host(&query.host) {
        return error_response(&e).into_response();
    }

    ws.on_upgrade(move |socket| handle_stream(socket, state, query.host))
}

fn error_frame(e: &ActionError) -> Message {
    Message::Text(json!({"error": e.to_string(), "code": e.code()}).to_string().into())
}

/// Forward probe ticks to the socket until either side stops.
async fn handle_stream(socket: WebSocket, state: AppState, host: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let target = Target {
        host: Some(host.clone()),
        ..Target::default()
    };
    let mut stream = match state.dispatcher.dispatch(Command::StatusStream, &target).await {
        Ok(Outcome::Stream(stream)) => stream,
        Ok(_) => {
            warn!("Status stream for {host}: dispatcher returned no stream");
            let _ = ws_sink.close().await;
            return;
        }
        Err(e) => {
            let _ = ws_sink.send(error_frame(&e)).await;
            let _ = ws_sink.close().await;
            return;
        }
    };
    info!("Status stream opened for {host}");

    let probe_ended = loop {
        tokio::select! {
            update = stream.next() => {
                let Some(is_online) = update else { break true };
                let frame = match serde_json::to_string(&StatusData { is_online }) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Status stream: failed to serialize update: {e}");
                        continue;
                    }
                };
                if ws_sink.send(Message::Text(frame.into())).await.is_err() {
                    break false;
                }
            }
            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break false,
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    if probe_ended {
        if let Err(e) = stream.finish().await {
            warn!("Status stream for {host} failed: {e}");
            let _ = ws_sink.send(error_frame(&e)).await;
        }
        let _ = ws_sink.close().await;
    } else if let Err(e) = stream.finish().await {
        debug!("Status stream for {host} ended with: {e}");
    }
    info!("Status stream closed for {host}");
}
