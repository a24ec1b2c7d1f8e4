//! Dispatch errors and their stable codes

use std::fmt;

use crate::storage::StorageError;

pub const INVALID_API_KEY: &str = "invalid or inactive API key";

#[derive(Debug)]
pub enum DispatchError {
    /// Bad, unknown or inactive API key, or a rejected signature
    Authentication(String),

    /// The caller does not own the referenced host
    Permission,

    /// Malformed or out-of-range input
    Validation { field: String, message: String },

    /// The referenced host (or key) does not exist
    NotFound(String),

    /// The persistence layer failed
    Storage(StorageError),
}

impl DispatchError {
    pub fn invalid_api_key() -> Self {
        DispatchError::Authentication(INVALID_API_KEY.to_string())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn unknown_action() -> Self {
        Self::validation("action", "unknown action")
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Authentication(_) => "authentication_error",
            DispatchError::Permission => "permission_error",
            DispatchError::Validation { .. } => "validation_error",
            DispatchError::NotFound(_) => "not_found_error",
            DispatchError::Storage(_) => "internal_error",
        }
    }

    /// HTTP status equivalent
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::Authentication(_) => 401,
            DispatchError::Permission => 403,
            DispatchError::Validation { .. } => 400,
            DispatchError::NotFound(_) => 404,
            DispatchError::Storage(_) => 500,
        }
    }

    /// Offending field, for validation errors
    pub fn field(&self) -> Option<&str> {
        match self {
            DispatchError::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Authentication(reason) => write!(f, "{}", reason),
            DispatchError::Permission => write!(f, "permission denied"),
            DispatchError::Validation { message, .. } => write!(f, "{}", message),
            DispatchError::NotFound(what) => write!(f, "{}", what),
            DispatchError::Storage(err) => write!(f, "internal error: {}", err),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for DispatchError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => DispatchError::NotFound(what),
            other => DispatchError::Storage(other),
        }
    }
}
