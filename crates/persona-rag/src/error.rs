//! Error types for the ingestion pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ingestion pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Extraction failure: unreadable, empty, oversized, or schema-invalid source
    #[error("Extraction failed for '{document}': {message}")]
    Extraction { document: String, message: String },

    /// Degenerate input produced more chunks than the configured ceiling
    #[error("Chunking error: {0}")]
    Chunking(String),

    /// Per-chunk knowledge-graph extraction failure
    #[error("Graph extraction failed: {0}")]
    GraphExtraction(String),

    /// The persistence layer rejected a write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Frontmatter or payload validation failure
    #[error("Validation error: {0}")]
    Validation(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job was cancelled between stages
    #[error("job cancelled")]
    Cancelled,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an extraction error
    pub fn extraction(document: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            document: document.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Config(msg) => (StatusCode::BAD_REQUEST, "config_error", msg.clone()),
            Error::Extraction { document, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "extraction_error",
                format!("Extraction failed for '{}': {}", document, message),
            ),
            Error::Chunking(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "chunking_error", msg.clone())
            }
            Error::GraphExtraction(msg) => (
                StatusCode::BAD_GATEWAY,
                "graph_extraction_error",
                msg.clone(),
            ),
            Error::Persistence(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error", msg.clone())
            }
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Error::Cancelled => (StatusCode::CONFLICT, "cancelled", self.to_string()),
            Error::Database(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
                err.to_string(),
            ),
            Error::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
                err.to_string(),
            ),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Http(err) => (StatusCode::BAD_GATEWAY, "http_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_extraction_error_display_and_no_source_chain() {
        let err = Error::extraction("report.pdf", "PDF is encrypted");
        assert_eq!(
            err.to_string(),
            "Extraction failed for 'report.pdf': PDF is encrypted"
        );
        // The document name is plain context, not a wrapped error
        assert!(err.source().is_none());
    }
}
