//! Refresh controller and the context it shares with the action gateway.
//!
//! - [`RefreshController`]: per-signal reconciliation for one unit
//! - [`ControllerContext`]: collaborators, thresholds and the record writer
//!
//! # Usage
//!
//! ```ignore
//! use keel_operator::controller::{ControllerContext, RefreshController};
//!
//! let ctx = Arc::new(ControllerContext::from_config(&config)?);
//! let controller = RefreshController::new(ctx);
//! let action = controller.handle(&LifecycleSignal::UpdateStatus).await?;
//! ```

mod refresh;

pub use refresh::RefreshController;

use keel_client::Client;
use keel_cluster::{CasOutcome, FilePeerChannel, PeerChannel};
use keel_core::{HealthGate, Transition, UnitId, UnitSequencer, VersionedRefresh};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::audit::AuditLogger;
use crate::collaborators::{OperationMonitor, TopologyProvider, WorkloadManager};
use crate::config::AgentConfig;
use crate::error::OperatorResult;
use crate::operations::MarkerOperationMonitor;
use crate::workload::CommandWorkload;

/// Shared context for the controller and the action gateway of one unit.
pub struct ControllerContext {
    /// This unit.
    pub unit: UnitId,
    /// Agent configuration.
    pub config: AgentConfig,
    /// Shared refresh record.
    pub channel: Arc<dyn PeerChannel>,
    /// Cluster membership and roles.
    pub topology: Arc<dyn TopologyProvider>,
    /// The local workload.
    pub workload: Arc<dyn WorkloadManager>,
    /// Conflicting operations.
    pub operations: Arc<dyn OperationMonitor>,
    /// Health gate built from `config.gate`.
    pub gate: HealthGate,
    /// Unit ordering.
    pub sequencer: UnitSequencer,
    /// Audit trail attributed to `unit`.
    pub audit: AuditLogger,
}

/// Result of a stamped write of a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record was written with this stamp.
    Applied {
        /// Stamp of the new record.
        stamp: u64,
    },
    /// The transition changed nothing; no write was made.
    Unchanged,
    /// Another writer got there first.
    Conflict {
        /// The record as currently stored.
        current: VersionedRefresh,
    },
}

impl ControllerContext {
    /// Assemble a context from explicit collaborators.
    pub fn new(
        config: AgentConfig,
        channel: Arc<dyn PeerChannel>,
        topology: Arc<dyn TopologyProvider>,
        workload: Arc<dyn WorkloadManager>,
        operations: Arc<dyn OperationMonitor>,
    ) -> OperatorResult<Self> {
        config.validate()?;
        let unit = config.unit_id()?.clone();
        Ok(Self {
            gate: HealthGate::new(config.gate.clone()),
            sequencer: UnitSequencer::new(),
            audit: AuditLogger::new(unit.clone()),
            unit,
            config,
            channel,
            topology,
            workload,
            operations,
        })
    }

    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: &AgentConfig) -> OperatorResult<Self> {
        let mut client = Client::new(config.coordinator.url.clone())?
            .with_timeout(config.coordinator_timeout())?;
        if let (Some(user), Some(password)) =
            (&config.coordinator.username, &config.coordinator.password)
        {
            client = client.with_basic_auth(user.clone(), password.clone());
        }

        let channel = FilePeerChannel::new(config.peer_store.clone())
            .with_lock_timeout(config.lock_timeout());
        let workload = CommandWorkload::new(
            config.workload.clone(),
            config.application.clone(),
            config.probe_timeout(),
        );
        let operations = MarkerOperationMonitor::new(config.operation_marker_dir.clone());

        Self::new(
            config.clone(),
            Arc::new(channel),
            Arc::new(client),
            Arc::new(workload),
            Arc::new(operations),
        )
    }

    /// Read the shared record.
    pub async fn load(&self) -> OperatorResult<VersionedRefresh> {
        Ok(self.channel.load().await?)
    }

    /// Write `transition` over `record` if the stamp has not moved.
    ///
    /// Applied writes are audited.
    pub async fn persist(
        &self,
        record: &VersionedRefresh,
        transition: &Transition,
    ) -> OperatorResult<WriteOutcome> {
        if !transition.applied {
            return Ok(WriteOutcome::Unchanged);
        }

        match self
            .channel
            .compare_and_swap(record.stamp, &transition.next)
            .await?
        {
            CasOutcome::Applied { stamp } => {
                debug!(
                    unit = %self.unit,
                    stamp,
                    phase = %transition.next.phase,
                    cursor = transition.next.cursor,
                    "Refresh record written"
                );
                self.audit.record(&record.refresh, &transition.next, stamp);
                Ok(WriteOutcome::Applied { stamp })
            }
            CasOutcome::Conflict { current } => {
                debug!(
                    unit = %self.unit,
                    expected = record.stamp,
                    actual = current.stamp,
                    "Lost refresh record write"
                );
                Ok(WriteOutcome::Conflict { current })
            }
        }
    }
}

/// Result type for reconciliation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Requeue after the specified duration.
    Requeue(Duration),
    /// Transient failure: requeue after the runtime's backoff delay.
    Backoff,
    /// Don't requeue; wait for the next signal.
    Done,
}

impl ReconcileAction {
    /// Requeue after 5 seconds.
    pub fn requeue_short() -> Self {
        Self::Requeue(Duration::from_secs(5))
    }

    /// Requeue after 30 seconds.
    pub fn requeue_medium() -> Self {
        Self::Requeue(Duration::from_secs(30))
    }
}
