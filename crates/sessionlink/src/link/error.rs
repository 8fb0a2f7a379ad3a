//! Link handshake error types.

use thiserror::Error;

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Ways the link handshake can fail. Every variant leaves the connection
/// unlinked; none of them is retried by the binder.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Network or transport-level failure.
    #[error("link request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("link rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The server answered 2xx but the body had no usable session index.
    #[error("invalid link response: {0}")]
    InvalidResponse(String),

    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}
