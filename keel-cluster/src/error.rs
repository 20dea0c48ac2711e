//! Error types for shared refresh state storage.

use keel_core::RecordError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for cluster storage operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur reading or writing the shared record.
///
/// A lost compare-and-swap is not an error; see [`crate::CasOutcome`].
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The stored record does not decode.
    #[error("Stored refresh record is invalid: {0}")]
    Record(#[from] RecordError),

    /// Refused to write a record that violates its own invariants.
    #[error("Refusing to write inconsistent record: {0}")]
    InvalidWrite(RecordError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another process held the store lock for too long.
    #[error("Timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout {
        /// The lock file.
        path: PathBuf,
        /// How long we waited.
        waited: Duration,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}
