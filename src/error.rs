//! Error types for shorts-dl
//!
//! - [`Error`] - library-wide error, returned synchronously by admission and
//!   control operations
//! - [`FetchError`] - failures of the external fetch operation, captured on
//!   the task rather than returned to the submitter
//! - [`ApiError`] / [`ToHttpStatus`] - structured HTTP error responses

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

use crate::task::TransitionError;
use crate::types::{TaskId, UserId};

/// Result type alias for shorts-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for shorts-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// Source reference rejected before admission
    #[error("invalid source {source_ref:?}: {reason}")]
    InvalidSource {
        /// The rejected source reference
        source_ref: String,
        /// Why it was rejected
        reason: String,
    },

    /// Admission denied by the per-user rate limit
    #[error("rate limit exceeded for user {user_id}, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited {
        /// User whose window is full
        user_id: UserId,
        /// Time until the oldest request leaves the window
        retry_after: Duration,
    },

    /// Task not found (not in flight and not in history)
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Illegal task state transition
    #[error("{0}")]
    InvalidTransition(#[from] TransitionError),

    /// Fetch operation error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Delivery path error
    #[error("delivery error: {0}")]
    Delivery(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// External tool execution failed (yt-dlp)
    #[error("external tool error: {0}")]
    ExternalTool(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Errors produced by a [`Fetcher`](crate::fetch::Fetcher)
#[derive(Debug, Error)]
pub enum FetchError {
    /// The progress hook asked the fetch to stop (cancellation checkpoint)
    #[error("fetch aborted by cancellation")]
    Aborted,

    /// The fetch tool reported an error (message is shown to the user verbatim)
    #[error("{0}")]
    Tool(String),

    /// The fetch tool could not be run at all
    #[error("fetch tool unavailable: {0}")]
    Unavailable(String),

    /// I/O error while fetching
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// API error response format
///
/// ```json
/// {
///   "error": {
///     "code": "rate_limited",
///     "message": "rate limit exceeded for user 7, retry in 12s",
///     "details": { "user_id": 7, "retry_after_seconds": 12 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "invalid_source")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::InvalidSource { .. } => 400,
            Error::NotFound(_) => 404,
            Error::InvalidTransition(_) => 409,
            Error::RateLimited { .. } => 429,
            Error::Fetch(_) => 502,
            Error::Delivery(_) => 502,
            Error::ShuttingDown => 503,
            Error::ExternalTool(_) => 503,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidSource { .. } => "invalid_source",
            Error::RateLimited { .. } => "rate_limited",
            Error::NotFound(_) => "not_found",
            Error::InvalidTransition(_) => "invalid_state",
            Error::Fetch(_) => "fetch_error",
            Error::Delivery(_) => "delivery_error",
            Error::Io(_) => "io_error",
            Error::ShuttingDown => "shutting_down",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::ExternalTool(_) => "external_tool_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            Error::InvalidSource { source_ref, reason } => Some(serde_json::json!({
                "source": source_ref,
                "reason": reason,
            })),
            Error::RateLimited {
                user_id,
                retry_after,
            } => Some(serde_json::json!({
                "user_id": user_id,
                "retry_after_seconds": retry_after.as_secs().max(1),
            })),
            Error::NotFound(id) => Some(serde_json::json!({
                "task_id": id,
            })),
            Error::InvalidTransition(e) => Some(serde_json::json!({
                "from": e.from,
                "to": e.to,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
