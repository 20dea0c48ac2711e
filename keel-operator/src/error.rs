//! Error types for the refresh operator.

use keel_client::ClientError;
use keel_cluster::ClusterError;
use keel_core::TransitionError;
use std::time::Duration;
use thiserror::Error;

/// Errors from the local workload manager.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// A workload command exited unsuccessfully.
    #[error("Command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        /// The command line.
        command: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// A workload command did not finish in time.
    #[error("Command `{command}` timed out after {after:?}")]
    Timeout {
        /// The command line.
        command: String,
        /// The limit that was hit.
        after: Duration,
    },

    /// The command could not be started.
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        /// The command line.
        command: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The workload reported a version string that does not parse.
    #[error("Workload reported invalid version: {0}")]
    InvalidVersion(String),
}

/// Errors that can occur during operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Shared record storage failed.
    #[error("Peer store error: {0}")]
    Cluster(#[from] ClusterError),

    /// The HA coordinator could not be queried.
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] ClientError),

    /// The state machine rejected an event.
    #[error("Transition rejected: {0}")]
    Transition(#[from] TransitionError),

    /// The local workload manager failed.
    #[error("Workload error: {0}")]
    Workload(#[from] WorkloadError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}

impl From<keel_core::CoreError> for OperatorError {
    fn from(err: keel_core::CoreError) -> Self {
        OperatorError::InvalidConfig(err.to_string())
    }
}
