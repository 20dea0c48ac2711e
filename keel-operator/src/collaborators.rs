//! Seams to the systems the controller depends on but does not own.

use async_trait::async_trait;
use keel_core::{OperationsInFlight, TopologyView, VersionPair};

use crate::error::{OperatorResult, WorkloadError};

/// Source of cluster membership and roles.
#[async_trait]
pub trait TopologyProvider: Send + Sync {
    /// Current topology snapshot.
    async fn topology(&self) -> OperatorResult<TopologyView>;
}

/// The local database workload.
#[async_trait]
pub trait WorkloadManager: Send + Sync {
    /// Version the workload runs now.
    async fn local_version(&self) -> Result<VersionPair, WorkloadError>;

    /// Switch the workload to `target`. Must be idempotent.
    async fn switch_version(&self, target: &VersionPair) -> Result<(), WorkloadError>;

    /// Local post-switch health probe.
    async fn probe(&self) -> Result<(), WorkloadError>;
}

/// Destructive operations that exclude a refresh.
#[async_trait]
pub trait OperationMonitor: Send + Sync {
    /// Operations running now.
    async fn operations_in_flight(&self) -> OperatorResult<OperationsInFlight>;
}

#[async_trait]
impl TopologyProvider for keel_client::Client {
    async fn topology(&self) -> OperatorResult<TopologyView> {
        Ok(self.cluster_status().await?)
    }
}
