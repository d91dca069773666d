//! Error types for the retrieval-augmented inference engine

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request body could not be decoded
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Query vector dimension differs from the index dimension
    #[error("Dimension mismatch: index expects {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Search against a snapshot with no passages
    #[error("Index is empty: no passages have been indexed")]
    EmptyIndex,

    /// No passage survived retrieval and filtering
    #[error("No passages matched the query")]
    NoResults,

    /// Context budget cannot hold a single passage
    #[error("Context budget of {budget} tokens is below the minimal passage cost of {minimum} tokens")]
    BudgetTooSmall { budget: usize, minimum: usize },

    /// Language model failed on every attempt
    #[error("Generation unavailable after {attempts} attempt(s): {last_error}")]
    GenerationUnavailable { attempts: u32, last_error: String },

    /// Passage rejected by the document store
    #[error("Invalid passage '{id}': {message}")]
    InvalidPassage { id: String, message: String },

    /// Two passages share an id
    #[error("Duplicate passage id: {0}")]
    DuplicatePassage(String),

    /// Embedding error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Ollama/LLM error
    #[error("LLM error: {0}")]
    Llm(String),

    /// A single model call exceeded its deadline
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Request was cancelled before it finished
    #[error("Request cancelled")]
    Cancelled,

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
    /// Create an invalid passage error
    pub fn invalid_passage(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPassage {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying the failed call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Llm(_) | Error::Embedding(_) | Error::Timeout(_) => true,
            Error::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().map(|s| s.is_server_error()).unwrap_or(true)
            }
            _ => false,
        }
    }

    /// Stable machine-readable name used in error bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::EmptyIndex => "empty_index",
            Error::NoResults => "no_results",
            Error::BudgetTooSmall { .. } => "budget_too_small",
            Error::GenerationUnavailable { .. } => "generation_unavailable",
            Error::InvalidPassage { .. } => "invalid_passage",
            Error::DuplicatePassage(_) => "duplicate_passage",
            Error::Embedding(_) => "embedding_error",
            Error::Llm(_) => "llm_error",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Http(_) => "http_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for the error response
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_)
            | Error::InvalidRequest(_)
            | Error::DimensionMismatch { .. }
            | Error::BudgetTooSmall { .. }
            | Error::InvalidPassage { .. }
            | Error::DuplicatePassage(_)
            | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::NoResults => StatusCode::NOT_FOUND,
            Error::EmptyIndex | Error::GenerationUnavailable { .. } | Error::Llm(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Http(_) | Error::Embedding(_) => StatusCode::BAD_GATEWAY,
            // 499: client closed request
            Error::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_codes() {
        let mismatch = Error::DimensionMismatch {
            expected: 256,
            actual: 128,
        };
        assert_eq!(mismatch.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(mismatch.kind(), "dimension_mismatch");
        assert_eq!(Error::EmptyIndex.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Error::NoResults.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Cancelled.status_code().as_u16(), 499);
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Timeout(100).is_transient());
        assert!(Error::llm("502 from backend").is_transient());
        assert!(!Error::NoResults.is_transient());
        assert!(!Error::Config("bad".into()).is_transient());
    }
}
