//! Error types for the document pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown record id
    #[error("File record not found: {0}")]
    NotFound(String),

    /// Stage name outside the fixed stage set
    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    /// Stage status edge that the state machine does not allow
    #[error("Invalid transition for stage '{stage}': {from} -> {to}")]
    InvalidTransition {
        stage: String,
        from: String,
        to: String,
    },

    /// Result payload does not belong to the stage being updated
    #[error("Result for stage '{result}' cannot be stored on stage '{stage}'")]
    StageResultMismatch { stage: String, result: String },

    /// Converter collaborator failure
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// Indexer collaborator failure
    #[error("Indexing failed: {0}")]
    Index(String),

    /// Soft or hard task budget exceeded
    #[error("Task timed out after {elapsed_secs}s ({budget} limit)")]
    TaskTimeout { budget: TimeBudget, elapsed_secs: u64 },

    /// A durable stage write failed while recording another outcome
    #[error("Store write failed: {0}")]
    StoreWriteFailure(String),

    /// Unknown task id
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Request rejected before any work was queued
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which task budget expired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBudget {
    Soft,
    Hard,
}

impl std::fmt::Display for TimeBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeBudget::Soft => f.write_str("soft"),
            TimeBudget::Hard => f.write_str("hard"),
        }
    }
}

impl Error {
    /// Create a conversion error
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    /// Create an indexing error
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::BAD_REQUEST, "config_error"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::TaskNotFound(_) => (StatusCode::NOT_FOUND, "task_not_found"),
            Error::InvalidStage(_) => (StatusCode::BAD_REQUEST, "invalid_stage"),
            Error::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            Error::StageResultMismatch { .. } => (StatusCode::BAD_REQUEST, "stage_result_mismatch"),
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::Conversion(_) => (StatusCode::UNPROCESSABLE_ENTITY, "conversion_error"),
            Error::Index(_) => (StatusCode::BAD_GATEWAY, "index_error"),
            Error::TaskTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "task_timeout"),
            Error::StoreWriteFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_write_failure"),
            Error::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Json(_) => (StatusCode::BAD_REQUEST, "json_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
