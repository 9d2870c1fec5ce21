//! `POST /api/wake`: send a Wake-on-LAN magic packet.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{dispatch, error_response, mismatched_outcome, rejection_response, ApiError};
use crate::address::HardwareAddress;
use crate::error::ActionError;
use crate::inventory::AddressSpec;
use crate::wake::WakeRequest;
use crate::{AppState, Command, Outcome, Target};

/// Request body for `POST /api/wake`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WakePayload {
    pub mac: String,
    /// Broadcast destinations. Omitted or empty means the server defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<AddressSpec>,
}

impl WakePayload {
    pub fn to_request(&self) -> Result<WakeRequest, ActionError> {
        if self.mac.is_empty() {
            return Err(ActionError::validation("mac is required"));
        }
        let mac: HardwareAddress = self.mac.parse()?;
        let targets = self
            .addresses
            .iter()
            .map(AddressSpec::validate)
            .collect::<Result<_, _>>()?;
        Ok(WakeRequest { mac, targets })
    }
}

/// `POST /api/wake`: returns `204 No Content` once the packet is handed to
/// every destination. Delivery is never confirmed.
///
/// # Errors
///
/// - `400 Bad Request` with `{"code":"INVALID_REQUEST"}`: bad JSON, MAC or address
pub async fn wake(
    State(state): State<AppState>,
    payload: Result<Json<WakePayload>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload.map_err(|e| rejection_response(&e))?;
    let request = payload.to_request().map_err(|e| error_response(&e))?;
    let target = Target {
        mac: Some(request.mac),
        broadcast: request.targets,
        ..Target::default()
    };
    match dispatch(&state, Command::Wake, &target).await? {
        Outcome::Woke { .. } => Ok(StatusCode::NO_CONTENT),
        _ => Err(mismatched_outcome(Command::Wake)),
    }
}
