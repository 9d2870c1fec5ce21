//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint. All handlers except
//! [`health`] require authentication via the [`crate::auth::require_api_key`]
//! middleware; the status stream checks its `?token=` itself.

pub mod halt;
pub mod health;
pub mod status;
pub mod wake;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::{self, ApiKey};
use crate::error::ActionError;
use crate::{ws, AppState, Command, Outcome, Target};

pub use halt::HaltPayload;
pub use status::StatusData;
pub use wake::WakePayload;

/// Error half of every handler's return type.
pub type ApiError = (StatusCode, Json<Value>);

/// Build the full API router.
///
/// | Method | Path                   | Auth   |
/// |--------|------------------------|--------|
/// | GET    | `/api/health`          | No     |
/// | POST   | `/api/wake`            | Bearer |
/// | POST   | `/api/halt`            | Bearer |
/// | GET    | `/api/status/{host}`   | Bearer |
/// | GET    | `/api/status-stream`   | `?token=` |
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/health", get(health::health));

    let authed_routes = Router::new()
        .route("/api/wake", post(wake::wake))
        .route("/api/halt", post(halt::halt))
        .route("/api/status/{host}", get(status::status))
        .layer(middleware::from_fn(auth::require_api_key));

    let ws_route = Router::new().route("/api/status-stream", get(ws::status_stream_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .merge(ws_route)
        .layer(Extension(ApiKey(state.config.auth.api_key.clone())))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Map an [`ActionError`] to its status and `{"error", "code"}` body.
pub fn error_response(e: &ActionError) -> ApiError {
    if e.status().is_server_error() {
        warn!("Action failed: {e}");
    }
    (
        e.status(),
        Json(json!({"error": e.to_string(), "code": e.code()})),
    )
}

/// Run `command` against `target` through the shared dispatcher.
pub(crate) async fn dispatch(
    state: &AppState,
    command: Command,
    target: &Target,
) -> Result<Outcome, ApiError> {
    state
        .dispatcher
        .dispatch(command, target)
        .await
        .map_err(|e| error_response(&e))
}

/// The dispatcher answered `command` with an outcome of another kind.
pub(crate) fn mismatched_outcome(command: Command) -> ApiError {
    warn!("Dispatcher returned an unexpected outcome for {command}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": format!("unexpected outcome for {command}"), "code": "INTERNAL"})),
    )
}

/// Malformed bodies and wrong content types are plain validation failures.
pub fn rejection_response(rejection: &JsonRejection) -> ApiError {
    error_response(&ActionError::validation(rejection.body_text()))
}
