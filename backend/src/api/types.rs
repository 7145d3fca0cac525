//! Request and response bodies of the run-control API.

use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::Filter;
use crate::error::ServerError;
use crate::runner::RunStatus;

/// Body of `POST /api/run/start`. An empty body keeps the configured filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub filter: Option<Filter>,
}

impl StartRequest {
    pub fn from_body(body: &[u8]) -> Result<Self, ServerError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| ServerError::BadRequest(e.to_string()))
    }
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: RunStatus,
    pub pending_questions: usize,
}

/// Acknowledgement of a queued command.
pub fn accepted(command: &str) -> Value {
    json!({
        "status": "accepted",
        "command": command,
    })
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

/// Map a server error to an HTTP rejection.
pub fn reject(error: ServerError) -> (StatusCode, Json<Value>) {
    let code = match error {
        ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ServerError::RunnerGone => StatusCode::SERVICE_UNAVAILABLE,
        ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(error_response(&error.to_string())))
}
