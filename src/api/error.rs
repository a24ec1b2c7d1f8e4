//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::collector::PollError;
use crate::storage::StorageError;
use crate::webhook::DispatchError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Rejected webhook action, rendered with its stable kind code
    Dispatch(DispatchError),

    /// A manual poll did not complete
    Poll(PollError),

    /// Storage operation failed
    Storage(StorageError),

    /// Invalid request parameters
    InvalidRequest(String),

    /// Resource not found
    NotFound(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Dispatch(err) => (
                StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                err.kind(),
            ),
            ApiError::Poll(PollError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found_error"),
            ApiError::Poll(PollError::NoCredentials(_)) => {
                (StatusCode::CONFLICT, "validation_error")
            }
            ApiError::Poll(PollError::Connection { .. } | PollError::Session(_)) => {
                (StatusCode::BAD_GATEWAY, "connection_error")
            }
            ApiError::Poll(PollError::Storage(_)) | ApiError::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found_error"),
        }
    }

    fn field(&self) -> Option<&str> {
        match self {
            ApiError::Dispatch(err) => err.field(),
            _ => None,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Dispatch(err) => err.to_string(),
            ApiError::Poll(err) => err.to_string(),
            ApiError::Storage(err) => err.to_string(),
            ApiError::InvalidRequest(msg) | ApiError::NotFound(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.parts();

        let mut body = json!({
            "success": false,
            "error": kind,
            "message": self.message(),
        });
        if let Some(field) = self.field() {
            body["field"] = json!(field);
        }

        (status, Json(body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError::Dispatch(err)
    }
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        ApiError::Poll(err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Storage(other),
        }
    }
}
