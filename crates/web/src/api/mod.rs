//! REST API endpoint modules.

pub mod documents;
pub mod merges;
pub mod status;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::error;

use gitdoc_core::codec::Attributes;
use gitdoc_core::errors::CodecError;
use gitdoc_core::DocumentError;

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// API error type that converts to an Axum response.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    NotAcceptable(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::NotAcceptable(msg) => (StatusCode::NOT_ACCEPTABLE, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        let message = err.to_string();
        match err {
            DocumentError::NotFound(_) => AppError::NotFound(message),
            DocumentError::AlreadyExists(_) | DocumentError::ReadOnlyVersion { .. } => {
                AppError::Conflict(message)
            }
            DocumentError::NotSaved(_)
            | DocumentError::InvalidAttributeName(_)
            | DocumentError::InvalidAttribute(_)
            | DocumentError::InvalidId(_)
            | DocumentError::ReadOnlyId(_)
            | DocumentError::Codec(CodecError::InvalidAttributeName(_)) => {
                AppError::NotAcceptable(message)
            }
            DocumentError::NotPersisted
            | DocumentError::Store(_)
            | DocumentError::Codec(_) => {
                error!(error = %message, "document operation failed");
                AppError::Internal(message)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Run a blocking core operation off the async runtime.
pub(crate) async fn blocking<T, F>(task: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {e}")))?
}

/// Parse a request body that must be a JSON object.
pub(crate) fn parse_attributes(body: &Bytes) -> Result<Attributes, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("request body is empty".into()));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(attrs)) => Ok(attrs),
        Ok(_) => Err(AppError::BadRequest("request body must be a JSON object".into())),
        Err(e) => Err(AppError::BadRequest(format!("invalid JSON body: {e}"))),
    }
}

/// Like [`parse_attributes`], but an empty body is an empty object.
pub(crate) fn parse_optional_attributes(body: &Bytes) -> Result<Attributes, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Attributes::new());
    }
    parse_attributes(body)
}
