use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::client::ClientError;
use crate::registry::WaitError;

/// HTTP-facing error: a status code and a human-readable message.
///
/// Broker internals never leak to clients; everything renders as
/// `{status: false, error}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": false,
            "data": null,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            // A failure envelope from the filemanager names a missing
            // file or bucket; everything else is an internal fault.
            ClientError::Wait(WaitError::Rejected(message)) => ApiError::not_found(message),
            ClientError::Wait(WaitError::Timeout) => {
                ApiError::internal("timeout waiting for response")
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}
