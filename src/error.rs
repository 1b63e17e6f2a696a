//! Error types for the sync engine
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::kind::DataKind;

// == Fetch Error ==
/// A network or API failure for one data kind.
///
/// Cloneable so that a single failed request can be handed to every
/// caller that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Fetch failed for '{kind}': {cause}")]
pub struct FetchError {
    /// The data kind that was being fetched
    pub kind: DataKind,
    /// Human readable reason
    pub cause: String,
    /// Upstream HTTP status, when the failure came from a response
    pub status: Option<u16>,
}

impl FetchError {
    pub fn new(kind: impl Into<DataKind>, cause: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            cause: cause.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

// == Sync Error Enum ==
/// Unified error type for the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Fetch failed and no cached value was available
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Nothing cached or subscribed under this name
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The real call behind a speculative update failed
    #[error("Optimistic update {operation_id} on '{target}' failed: {cause}")]
    OptimisticUpdateFailure {
        operation_id: u64,
        target: String,
        cause: String,
    },

    /// Cross-tab storage channel failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal engine error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::Fetch(_) => StatusCode::BAD_GATEWAY,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SyncError::OptimisticUpdateFailure { .. } => StatusCode::CONFLICT,
            SyncError::Config(_) | SyncError::Storage(_) | SyncError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the sync engine.
pub type Result<T> = std::result::Result<T, SyncError>;
