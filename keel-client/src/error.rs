//! Error types for the coordinator client.

use thiserror::Error;

/// Errors that can occur when querying the HA coordinator.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Coordinator returned an error response.
    #[error("Coordinator error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the coordinator.
        message: String,
    },

    /// Failed to deserialize response.
    #[error("Failed to deserialize response: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The response parsed but does not describe a usable cluster.
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
