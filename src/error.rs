//! Error taxonomy
//!
//! Library errors are typed with `thiserror`; `ApiError` is the HTTP boundary
//! and maps every variant to a status code and a JSON body.

use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use thiserror::Error;

/// Persistence layer failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("media storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),
}

/// Crop classifier artifact could not be used
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model artifact not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read model artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model artifact is not compatible: {0}")]
    Incompatible(String),
}

/// Failures inside a single recognizer call. Never leaves the recognizer.
#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("could not read image {path}: {reason}")]
    Image { path: PathBuf, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected result shape: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

// ============================================================================
// HTTP boundary
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("invalid fields")]
    InvalidFields(BTreeMap<String, String>),

    #[error("authentication required")]
    Unauthorized,

    #[error("invalid credentials")]
    InvalidCredentials,

    /// Body could not be read; keeps the extractor's status (e.g. 413)
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    /// Computation succeeded but saving it did not. `computed` stays in the body.
    #[error("{message}")]
    Persistence {
        message: String,
        computed: Option<serde_json::Value>,
    },

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            ApiError::InvalidFields(errors) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "errors": errors }),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "detail": "Authentication credentials were not provided." }),
            ),
            ApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "detail": "No active account found with the given credentials" }),
            ),
            ApiError::Rejected { status, message } => (status, serde_json::json!({ "error": message })),
            ApiError::Persistence { message, computed } => {
                let mut body = serde_json::json!({ "error": message });
                if let (Some(serde_json::Value::Object(extra)), Some(obj)) =
                    (computed, body.as_object_mut())
                {
                    for (key, value) in extra {
                        obj.entry(key).or_insert(value);
                    }
                }
                (StatusCode::INTERNAL_SERVER_ERROR, body)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": msg }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Persistence {
            message: format!("Failed to save: {}", err),
            computed: None,
        }
    }
}
