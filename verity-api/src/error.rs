//! HTTP error type for verity-api
//!
//! Every failure is returned as `{"success": false, "message": ...}`.
//! Server-side failures get a generic message; in development mode the
//! underlying error is added under `error`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::OnceCell;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::services::VerifyError;

static DEVELOPMENT_MODE: OnceCell<bool> = OnceCell::new();

/// Enable error detail in responses; only the first call has an effect
pub fn set_development_mode(enabled: bool) {
    let _ = DEVELOPMENT_MODE.set(enabled);
}

pub fn is_development_mode() -> bool {
    DEVELOPMENT_MODE.get().copied().unwrap_or(false)
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("{0}")]
    BadRequest(String),

    /// Missing or invalid session (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Request body too large (413)
    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Common(#[from] verity_common::Error),
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            ApiError::Verify(err) => match err {
                VerifyError::ImageDecode(_) => (
                    StatusCode::BAD_REQUEST,
                    "Uploaded file is not a valid image".to_string(),
                ),
                VerifyError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
                VerifyError::AlreadyResolved(_) => (
                    StatusCode::CONFLICT,
                    "Notification has already been resolved".to_string(),
                ),
                VerifyError::UploadWithdrawn(_) => (
                    StatusCode::CONFLICT,
                    "The upload is no longer pending".to_string(),
                ),
                VerifyError::InvalidAction(action) => {
                    (StatusCode::BAD_REQUEST, format!("Invalid action: {}", action))
                }
                VerifyError::Common(verity_common::Error::NotFound(what)) => {
                    (StatusCode::NOT_FOUND, format!("{} not found", what))
                }
                VerifyError::Common(verity_common::Error::InvalidInput(msg)) => {
                    (StatusCode::BAD_REQUEST, msg.clone())
                }
                VerifyError::IncompatibleSignature(_)
                | VerifyError::Storage(_)
                | VerifyError::Common(_) => internal(),
            },
            ApiError::Common(err) => match err {
                verity_common::Error::NotFound(what) => {
                    (StatusCode::NOT_FOUND, format!("{} not found", what))
                }
                verity_common::Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                _ => internal(),
            },
        }
    }
}

fn internal() -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error".to_string(),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        let body = if status.is_server_error() {
            error!(error = %self, "Request failed");
            if is_development_mode() {
                json!({ "success": false, "message": message, "error": self.to_string() })
            } else {
                json!({ "success": false, "message": message })
            }
        } else {
            json!({ "success": false, "message": message })
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
