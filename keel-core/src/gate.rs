//! Health gating for refresh steps.
//!
//! [`HealthGate`] is purely advisory: it inspects a topology snapshot, the set
//! of destructive operations in flight and the refresh record, and answers
//! whether a unit may switch versions now. It has no side effects and is
//! safe to call any number of times. Retrying a transient failure is the
//! caller's business.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::CoreError;
use crate::refresh::{ClusterRefresh, RefreshDirection};
use crate::topology::TopologyView;
use crate::types::{UnitId, VersionPair};

/// Default replication lag bound: 1 MiB.
pub const DEFAULT_MAX_LAG_BYTES: u64 = 1024 * 1024;

/// Destructive operations that exclude a refresh step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A backup is being taken.
    Backup,
    /// A restore is being applied.
    Restore,
    /// Units are being added or removed.
    Scale,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Backup => write!(f, "backup"),
            OperationKind::Restore => write!(f, "restore"),
            OperationKind::Scale => write!(f, "scale"),
        }
    }
}

/// Destructive operations recorded for the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationsInFlight(BTreeSet<OperationKind>);

impl OperationsInFlight {
    /// No operation in flight.
    pub fn none() -> Self {
        Self::default()
    }

    /// Add an operation.
    #[must_use]
    pub fn with(mut self, kind: OperationKind) -> Self {
        self.0.insert(kind);
        self
    }

    /// Record an operation.
    pub fn insert(&mut self, kind: OperationKind) {
        self.0.insert(kind);
    }

    /// The first recorded operation, in a stable order.
    pub fn first(&self) -> Option<OperationKind> {
        self.0.iter().next().copied()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the recorded operations.
    pub fn iter(&self) -> impl Iterator<Item = OperationKind> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<OperationKind> for OperationsInFlight {
    fn from_iter<I: IntoIterator<Item = OperationKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Why a unit may not proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum GateFailure {
    /// Another destructive operation is running.
    ConflictingOperation {
        /// The operation in flight.
        operation: OperationKind,
    },
    /// The HA coordinator does not know the unit.
    UnitUnknown {
        /// The unit.
        unit: UnitId,
    },
    /// The unit's database process is not running.
    UnitNotRunning {
        /// The unit.
        unit: UnitId,
    },
    /// A follower is too far behind the leader.
    ReplicationLagging {
        /// The unit.
        unit: UnitId,
        /// Observed lag.
        lag_bytes: u64,
        /// Configured bound.
        bound_bytes: u64,
    },
    /// The pause policy requires operator confirmation first. This is a
    /// designed halt, not an operational failure.
    AwaitingConfirmation {
        /// The unit waiting to refresh.
        unit: UnitId,
    },
}

impl GateFailure {
    /// Whether this is the designed confirmation halt.
    pub fn is_confirmation(&self) -> bool {
        matches!(self, GateFailure::AwaitingConfirmation { .. })
    }
}

impl fmt::Display for GateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateFailure::ConflictingOperation { operation } => {
                write!(f, "{operation} in progress")
            }
            GateFailure::UnitUnknown { unit } => {
                write!(f, "{unit} is not reported by the HA coordinator")
            }
            GateFailure::UnitNotRunning { unit } => write!(f, "{unit} database is not running"),
            GateFailure::ReplicationLagging {
                unit,
                lag_bytes,
                bound_bytes,
            } => write!(
                f,
                "{unit} replication lag {lag_bytes} bytes exceeds {bound_bytes} bytes"
            ),
            GateFailure::AwaitingConfirmation { unit } => {
                write!(f, "awaiting confirmation to refresh {unit}")
            }
        }
    }
}

/// Gate outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateVerdict {
    /// The unit may proceed.
    Pass,
    /// The unit must not proceed.
    Fail(GateFailure),
}

impl GateVerdict {
    /// Whether the verdict is a pass.
    pub fn is_pass(&self) -> bool {
        matches!(self, GateVerdict::Pass)
    }
}

/// Why a cluster failed preflight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum PreflightFailure {
    /// Another destructive operation is running.
    ConflictingOperation {
        /// The operation in flight.
        operation: OperationKind,
    },
    /// The HA coordinator reported no members.
    EmptyTopology,
    /// No unit holds the leader role.
    NoLeader,
    /// More than one unit claims the leader role.
    MultipleLeaders {
        /// The claimants.
        leaders: Vec<UnitId>,
    },
    /// A unit failed its health check.
    UnitUnhealthy {
        /// The failing check.
        failure: GateFailure,
    },
    /// Taking one unit down would risk losing quorum.
    InsufficientQuorumMargin {
        /// Units with a running database.
        healthy: usize,
        /// Units in the cluster.
        total: usize,
        /// Margin required by configuration.
        required: usize,
    },
}

impl fmt::Display for PreflightFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightFailure::ConflictingOperation { operation } => {
                write!(f, "{operation} in progress")
            }
            PreflightFailure::EmptyTopology => write!(f, "HA coordinator reports no members"),
            PreflightFailure::NoLeader => write!(f, "cluster has no leader"),
            PreflightFailure::MultipleLeaders { leaders } => {
                let names: Vec<_> = leaders.iter().map(UnitId::as_str).collect();
                write!(f, "multiple leaders reported: {}", names.join(", "))
            }
            PreflightFailure::UnitUnhealthy { failure } => write!(f, "{failure}"),
            PreflightFailure::InsufficientQuorumMargin {
                healthy,
                total,
                required,
            } => write!(
                f,
                "{healthy}/{total} units healthy; a quorum margin of {required} is required"
            ),
        }
    }
}

/// Gate thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfig {
    /// Maximum replication lag a follower may have before it refreshes.
    #[serde(default = "default_max_lag_bytes")]
    pub max_lag_bytes: u64,
    /// Unit losses the cluster must be able to absorb at preflight.
    #[serde(default = "default_min_quorum_margin")]
    pub min_quorum_margin: usize,
}

fn default_max_lag_bytes() -> u64 {
    DEFAULT_MAX_LAG_BYTES
}

fn default_min_quorum_margin() -> usize {
    1
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_lag_bytes: default_max_lag_bytes(),
            min_quorum_margin: default_min_quorum_margin(),
        }
    }
}

impl GateConfig {
    /// Validate the thresholds.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.min_quorum_margin == 0 {
            return Err(CoreError::InvalidConfig(
                "minQuorumMargin must be at least 1: a refreshing unit is down".into(),
            ));
        }
        Ok(())
    }
}

/// Evaluates whether a unit, or the cluster, is fit to proceed.
#[derive(Debug, Clone, Default)]
pub struct HealthGate {
    config: GateConfig,
}

impl HealthGate {
    /// Create a gate with the given thresholds.
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// The configured thresholds.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Whether `unit` may switch versions now.
    ///
    /// Checks run in order and stop at the first failure: conflicting
    /// operations, then the unit's own health, then operator confirmation.
    ///
    /// During a rollback the health check is skipped for a unit whose
    /// `local_version` is still the version being rolled back: that unit may
    /// be down because of it, and switching it back is how it recovers.
    pub fn can_proceed(
        &self,
        unit: &UnitId,
        view: &TopologyView,
        operations: &OperationsInFlight,
        refresh: &ClusterRefresh,
        local_version: Option<&VersionPair>,
    ) -> GateVerdict {
        if let Some(operation) = operations.first() {
            return GateVerdict::Fail(GateFailure::ConflictingOperation { operation });
        }

        let restoring = refresh.direction() == RefreshDirection::Rollback
            && local_version.is_some()
            && local_version == refresh.rollback_of.as_ref();
        if !restoring {
            if let Err(failure) = self.check_unit(unit, view) {
                return GateVerdict::Fail(failure);
            }
        }

        if refresh.current_unit() == Some(unit) && refresh.awaiting_confirmation() {
            return GateVerdict::Fail(GateFailure::AwaitingConfirmation { unit: unit.clone() });
        }

        GateVerdict::Pass
    }

    /// Process liveness and, for followers, the replication lag bound.
    pub fn check_unit(&self, unit: &UnitId, view: &TopologyView) -> Result<(), GateFailure> {
        let status = view
            .get(unit)
            .ok_or_else(|| GateFailure::UnitUnknown { unit: unit.clone() })?;

        if !status.healthy {
            return Err(GateFailure::UnitNotRunning { unit: unit.clone() });
        }

        if status.role.is_follower() && status.replication_lag_bytes > self.config.max_lag_bytes {
            return Err(GateFailure::ReplicationLagging {
                unit: unit.clone(),
                lag_bytes: status.replication_lag_bytes,
                bound_bytes: self.config.max_lag_bytes,
            });
        }

        Ok(())
    }

    /// Cluster-wide preflight run before a refresh is planned.
    pub fn preflight(
        &self,
        view: &TopologyView,
        operations: &OperationsInFlight,
    ) -> Result<(), PreflightFailure> {
        if let Some(operation) = operations.first() {
            return Err(PreflightFailure::ConflictingOperation { operation });
        }

        if view.is_empty() {
            return Err(PreflightFailure::EmptyTopology);
        }

        let leaders: Vec<UnitId> = view.leaders().map(|m| m.unit_id.clone()).collect();
        match leaders.len() {
            0 => return Err(PreflightFailure::NoLeader),
            1 => {}
            _ => return Err(PreflightFailure::MultipleLeaders { leaders }),
        }

        for member in view.members() {
            self.check_unit(&member.unit_id, view)
                .map_err(|failure| PreflightFailure::UnitUnhealthy { failure })?;
        }

        if view.quorum_margin() < self.config.min_quorum_margin as i64 {
            return Err(PreflightFailure::InsufficientQuorumMargin {
                healthy: view.healthy_count(),
                total: view.len(),
                required: self.config.min_quorum_margin,
            });
        }

        Ok(())
    }
}
