//! Error handling for the framesearch services
//!
//! Every variant maps to an HTTP status and a stable `message` key. The
//! detailed cause is logged server-side and never written to the body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid feature/backend definitions (fatal at startup)
    #[error("Config error: {0}")]
    Config(String),

    /// Embedding provider failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector store call failed
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// No backend configured for the requested role
    #[error("{0} function is not supported")]
    NotSupported(String),

    /// Every backend probe failed
    #[error("Backend unavailable for {operation}: {detail}")]
    BackendUnavailable { operation: String, detail: String },

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request parameter
    #[error("Validation error: {0}")]
    Validation(String),

    /// Range header outside the file
    #[error("Range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    /// Engine operation failed; `operation` becomes the user-facing key
    #[error("{operation} failed: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Tag an engine failure with the operation name used in the response body
    pub fn during(self, operation: &'static str) -> Self {
        match self {
            Error::Operation { .. } => self,
            other => Error::Operation {
                operation,
                source: Box::new(other),
            },
        }
    }

    /// Status code and stable message key returned to the client
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration errors".to_string()),
            Error::Embedding(_) | Error::VectorStore(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "search errors".to_string())
            }
            Error::NotSupported(role) => (
                StatusCode::NOT_FOUND,
                format!("{} function is not supported", role),
            ),
            Error::BackendUnavailable { operation, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{} errors", operation),
            ),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "unavailable".to_string()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::RangeNotSatisfiable(_) => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                "range not satisfiable".to_string(),
            ),
            Error::Operation { operation, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{} errors", operation),
            ),
            Error::Internal(_) | Error::Serialization(_) | Error::Http(_) | Error::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal errors".to_string())
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                message = %message,
                error = %self,
                "Request error"
            );
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_message_hides_detail() {
        let err = Error::Embedding("model exploded at layer 3".to_string()).during("search_multimodal");
        let (status, message) = err.status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "search_multimodal errors");
    }

    #[test]
    fn test_not_supported_is_404() {
        let (status, message) = Error::NotSupported("search".to_string()).status_and_message();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(message, "search function is not supported");
    }

    #[test]
    fn test_during_does_not_nest() {
        let err = Error::VectorStore("down".to_string())
            .during("search_image")
            .during("search_multimodal");
        let (_, message) = err.status_and_message();
        assert_eq!(message, "search_image errors");
    }
}
