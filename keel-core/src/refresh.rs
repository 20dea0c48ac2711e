//! The cluster refresh record and its per-unit companion.
//!
//! [`ClusterRefresh`] is the single piece of cluster-visible state that
//! describes a refresh: its plan, its progress and its phase. It is replicated
//! between units through the peer channel and is only ever replaced as a whole
//! (see `keel-cluster`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::types::{RefreshId, Role, UnitId, VersionPair};

/// Phase of a cluster refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPhase {
    /// No refresh planned.
    #[default]
    Idle,
    /// Preflight passed and a plan exists; waiting for the new version.
    PreflightPassed,
    /// Units are being switched to the target version.
    InProgress,
    /// Halted for operator confirmation.
    Paused,
    /// Every planned unit completed its switch.
    Completed,
    /// A rollback walk back to the original version is in progress.
    RolledBack,
    /// A unit failed to come up on the new version; operator must decide.
    Failed,
}

impl RefreshPhase {
    /// Stable textual form used in the flat record.
    pub const fn as_str(self) -> &'static str {
        match self {
            RefreshPhase::Idle => "idle",
            RefreshPhase::PreflightPassed => "preflight-passed",
            RefreshPhase::InProgress => "in-progress",
            RefreshPhase::Paused => "paused",
            RefreshPhase::Completed => "completed",
            RefreshPhase::RolledBack => "rolled-back",
            RefreshPhase::Failed => "failed",
        }
    }

    /// Whether units are actively walking the plan in this phase.
    pub const fn is_walking(self) -> bool {
        matches!(self, RefreshPhase::InProgress | RefreshPhase::RolledBack)
    }
}

impl fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "idle" => RefreshPhase::Idle,
            "preflight-passed" => RefreshPhase::PreflightPassed,
            "in-progress" => RefreshPhase::InProgress,
            "paused" => RefreshPhase::Paused,
            "completed" => RefreshPhase::Completed,
            "rolled-back" => RefreshPhase::RolledBack,
            "failed" => RefreshPhase::Failed,
            other => return Err(format!("unknown phase '{other}'")),
        })
    }
}

/// How often the refresh halts for operator confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PausePolicy {
    /// Never halt.
    None,
    /// Halt once, after the first unit.
    #[default]
    First,
    /// Halt after every unit.
    All,
}

impl PausePolicy {
    /// Stable textual form used in the flat record.
    pub const fn as_str(self) -> &'static str {
        match self {
            PausePolicy::None => "none",
            PausePolicy::First => "first",
            PausePolicy::All => "all",
        }
    }

    /// Whether the unit at `cursor` of a plan of `plan_len` units needs
    /// operator confirmation before it may switch.
    pub const fn requires_confirmation(self, cursor: usize, plan_len: usize) -> bool {
        if cursor == 0 || cursor >= plan_len {
            return false;
        }
        match self {
            PausePolicy::None => false,
            PausePolicy::First => cursor == 1,
            PausePolicy::All => true,
        }
    }
}

impl fmt::Display for PausePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PausePolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(PausePolicy::None),
            "first" => Ok(PausePolicy::First),
            "all" => Ok(PausePolicy::All),
            other => Err(CoreError::InvalidConfig(format!(
                "pause policy must be none, first or all, got '{other}'"
            ))),
        }
    }
}

/// Direction of the walk over the planned order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshDirection {
    /// Moving every unit to the target version.
    Upgrade,
    /// Moving every unit back to the original version.
    Rollback,
}

/// Cluster-wide refresh record.
///
/// `cursor` counts the units of `planned_order` that completed their local
/// switch; the unit permitted to act is `planned_order[cursor]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRefresh {
    /// Identifier of this refresh run.
    pub id: Option<RefreshId>,
    /// Version the cluster ran when preflight passed.
    pub original_version: Option<VersionPair>,
    /// Version being refreshed to; known once the platform signals it.
    pub target_version: Option<VersionPair>,
    /// Current phase.
    pub phase: RefreshPhase,
    /// Operator-configured pause policy.
    pub pause_policy: PausePolicy,
    /// Unit order frozen when the walk was planned.
    pub planned_order: Vec<UnitId>,
    /// Number of units that completed their switch.
    pub cursor: usize,
    /// Version being rolled back from; set for the whole rollback walk.
    pub rollback_of: Option<VersionPair>,
    /// Cursor value the operator last confirmed continuation at.
    pub confirmed_cursor: Option<usize>,
    /// Unit currently executing its physical version switch.
    pub step_in_flight: Option<UnitId>,
    /// Leader at the time the plan was frozen.
    pub leader_at_planning: Option<UnitId>,
    /// Cause of the last failure.
    pub last_error: Option<String>,
    /// Command that restores the original version, captured at preflight.
    pub rollback_command: Option<String>,
}

impl ClusterRefresh {
    /// The idle record: no refresh planned.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Direction of the current walk.
    pub fn direction(&self) -> RefreshDirection {
        if self.rollback_of.is_some() {
            RefreshDirection::Rollback
        } else {
            RefreshDirection::Upgrade
        }
    }

    /// The version units are currently being moved to.
    pub fn active_target(&self) -> Option<&VersionPair> {
        match self.direction() {
            RefreshDirection::Upgrade => self.target_version.as_ref(),
            RefreshDirection::Rollback => self.original_version.as_ref(),
        }
    }

    /// The unit whose turn it is, regardless of phase.
    pub fn current_unit(&self) -> Option<&UnitId> {
        self.planned_order.get(self.cursor)
    }

    /// The unit permitted to mutate progress right now, if any.
    pub fn permitted_unit(&self) -> Option<&UnitId> {
        if self.phase.is_walking() {
            self.current_unit()
        } else {
            None
        }
    }

    /// Position of `unit` in the planned order.
    pub fn position_of(&self, unit: &UnitId) -> Option<usize> {
        self.planned_order.iter().position(|u| u == unit)
    }

    /// Whether every planned unit has completed.
    pub fn all_completed(&self) -> bool {
        !self.planned_order.is_empty() && self.cursor >= self.planned_order.len()
    }

    /// Whether the unit at the cursor still needs operator confirmation.
    pub fn awaiting_confirmation(&self) -> bool {
        self.direction() == RefreshDirection::Upgrade
            && self
                .pause_policy
                .requires_confirmation(self.cursor, self.planned_order.len())
            && self.confirmed_cursor != Some(self.cursor)
    }

    /// Units that completed their switch, in plan order.
    pub fn completed_units(&self) -> &[UnitId] {
        let done = self.cursor.min(self.planned_order.len());
        &self.planned_order[..done]
    }

    /// Units still to switch, in plan order.
    pub fn remaining_units(&self) -> &[UnitId] {
        let done = self.cursor.min(self.planned_order.len());
        &self.planned_order[done..]
    }
}

/// Result of the most recent local health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckRecord {
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
    /// Whether it passed.
    pub passed: bool,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Locally observed state of one unit. Advisory only; the cluster record is
/// the source of truth for progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRefreshRecord {
    /// The unit.
    pub unit_id: UnitId,
    /// Version the workload manager reports.
    pub local_version: Option<VersionPair>,
    /// Most recent health check.
    pub last_health_check: Option<HealthCheckRecord>,
    /// Role from the latest topology view.
    pub role: Option<Role>,
}

impl UnitRefreshRecord {
    /// Create an empty record for a unit.
    pub fn new(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            local_version: None,
            last_health_check: None,
            role: None,
        }
    }

    /// Record a health check outcome.
    pub fn record_check(&mut self, passed: bool, detail: Option<String>) {
        self.last_health_check = Some(HealthCheckRecord {
            checked_at: Utc::now(),
            passed,
            detail,
        });
    }
}
