//! `GET /api/status/{host}`: one-shot liveness check.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{dispatch, mismatched_outcome, ApiError};
use crate::{AppState, Command, Outcome, Target};

/// Body of a status response and of every status-stream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct StatusData {
    pub is_online: bool,
}

/// `GET /api/status/{host}`: `{"is_online": bool}`. Waits up to
/// `probe.status_timeout_ms` for an echo reply.
///
/// # Errors
///
/// - `400` `INVALID_REQUEST`: malformed host
/// - `500` `PROBE_FAILED`: host does not resolve, or no raw-socket privilege
pub async fn status(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<StatusData>, ApiError> {
    let target = Target {
        host: Some(host),
        ..Target::default()
    };
    match dispatch(&state, Command::Status, &target).await? {
        Outcome::Status { online } => Ok(Json(StatusData { is_online: online })),
        _ => Err(mismatched_outcome(Command::Status)),
    }
}
