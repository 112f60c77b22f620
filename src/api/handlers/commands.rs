use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::control::{Command, CommandOutput, Request};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct CommandRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: String,
    /// Generated when the client doesn't supply one.
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub request_id: String,
    pub data: CommandOutput,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn submit_command(
    State(state): State<Arc<AppState>>,
    AppJson(body): AppJson<CommandRequest>,
) -> Result<Json<JSend<CommandResponse>>, ApiError> {
    let command =
        Command::parse(&body.kind, &body.data).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let id = body
        .request_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (reply, response) = oneshot::channel();
    state
        .commands
        .send(Request {
            id,
            command,
            reply,
        })
        .await
        .map_err(|_| ApiError::unavailable("Controller is not running"))?;

    let response = response
        .await
        .map_err(|_| ApiError::internal("Request was dropped without a response"))?;

    match response.result {
        Ok(data) => Ok(JSend::success(CommandResponse {
            request_id: response.request_id,
            data,
        })),
        Err(message) => Err(ApiError::unprocessable(message)),
    }
}
