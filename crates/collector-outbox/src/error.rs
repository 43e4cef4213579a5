//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// No collector endpoint has been configured.
    ///
    /// Draining without a destination is programmer error, not a transient
    /// condition, so it surfaces loudly instead of dropping events.
    #[error("No collector endpoint configured")]
    MissingCollectorUrl,

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Send error
    #[error("Send failed: {0}")]
    Send(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
