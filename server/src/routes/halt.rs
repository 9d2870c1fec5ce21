//! `POST /api/halt`: power a host off over SSH.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{dispatch, error_response, mismatched_outcome, rejection_response, ApiError};
use crate::error::ActionError;
use crate::inventory::{remote_host, PrivateKeySpec};
use crate::ssh::RemoteHost;
use crate::{AppState, Command, Outcome, Target};

/// Request body for `POST /api/halt`.
///
/// At least one of `password` and `private_key` is required. Key paths are
/// resolved on the server, relative to the server user's `~/.ssh`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HaltPayload {
    pub user: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKeySpec>,
}

impl HaltPayload {
    pub fn to_remote(&self) -> Result<RemoteHost, ActionError> {
        let port = self
            .port
            .map(|p| {
                u16::try_from(p)
                    .map_err(|_| ActionError::validation(format!("port {p} is out of range")))
            })
            .transpose()?;
        remote_host(
            &self.user,
            &self.host,
            port,
            self.password.as_deref(),
            self.private_key.as_ref(),
        )
    }
}

/// `POST /api/halt`: returns `204 No Content` after the halt command was
/// issued. The HTTP path never prompts, so encrypted keys need an embedded
/// passphrase.
///
/// # Errors
///
/// - `400` `INVALID_REQUEST`: bad JSON, user, host or port
/// - `422` `NO_CREDENTIAL` / `PASSPHRASE_REQUIRED` / `BAD_PASSPHRASE` / `KEY_UNREADABLE`
/// - `502` `DIAL_FAILED` / `HOST_KEY_REJECTED` / `AUTH_REJECTED` / `SESSION_FAILED`
pub async fn halt(
    State(state): State<AppState>,
    payload: Result<Json<HaltPayload>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload.map_err(|e| rejection_response(&e))?;
    let remote = payload.to_remote().map_err(|e| error_response(&e))?;
    let target = Target {
        ssh: Some(remote),
        ..Target::default()
    };
    match dispatch(&state, Command::Halt, &target).await? {
        Outcome::Halted => Ok(StatusCode::NO_CONTENT),
        _ => Err(mismatched_outcome(Command::Halt)),
    }
}
