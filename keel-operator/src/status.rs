//! Read-only status projection of the refresh record.
//!
//! [`StatusReport`] is the machine-readable view returned by the `status`
//! action. [`StatusFormatter`] turns it into the one-line status string and
//! level the platform shows for the local unit.
//!
//! # Example
//!
//! ```ignore
//! let report = StatusReport::project(&unit, &record, Some(&view), None);
//! let line = StatusFormatter::new().format(&report);
//! // line.message: "Refreshing to 16.2@rev2 (1/3 units done)"
//! ```

use chrono::{DateTime, Utc};
use keel_core::{
    PausePolicy, RefreshDirection, RefreshPhase, TopologyView, UnitId, UnitSequencer,
    VersionPair, VersionedRefresh,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status level shown by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    /// Normal operation.
    Active,
    /// The unit is doing work that affects availability.
    Maintenance,
    /// The unit is waiting for something outside its control.
    Waiting,
    /// Operator action required.
    Blocked,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusLevel::Active => "active",
            StatusLevel::Maintenance => "maintenance",
            StatusLevel::Waiting => "waiting",
            StatusLevel::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Leader change observed against the frozen plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderChange {
    /// Leader when the plan was made.
    pub was: UnitId,
    /// Leader now.
    pub now: UnitId,
}

/// Snapshot of the refresh as seen from one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Reporting unit.
    pub unit: UnitId,
    /// Record stamp.
    pub stamp: u64,
    /// Last write time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Refresh run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_id: Option<String>,
    /// Phase.
    pub phase: RefreshPhase,
    /// Walk direction.
    pub direction: RefreshDirection,
    /// Pause policy.
    pub pause_policy: PausePolicy,
    /// Version before the refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_version: Option<VersionPair>,
    /// Version the walk moves units to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_target: Option<VersionPair>,
    /// Frozen plan.
    pub planned_order: Vec<UnitId>,
    /// Units done.
    pub completed: usize,
    /// Units in the plan.
    pub total: usize,
    /// Unit whose turn it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_unit: Option<UnitId>,
    /// Whether the walk waits for `resume-refresh`.
    pub awaiting_confirmation: bool,
    /// Unit physically switching right now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_in_flight: Option<UnitId>,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Command that restores the original version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_command: Option<String>,
    /// Leader change since planning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_change: Option<LeaderChange>,
    /// Version the reporting unit runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_version: Option<VersionPair>,
}

impl StatusReport {
    /// Project `record` for `unit`. Topology and local version are optional;
    /// without them the leader-change note and local detail are omitted.
    pub fn project(
        unit: &UnitId,
        record: &VersionedRefresh,
        view: Option<&TopologyView>,
        local_version: Option<VersionPair>,
    ) -> Self {
        let r = &record.refresh;
        let walking = !matches!(r.phase, RefreshPhase::Idle | RefreshPhase::Completed | RefreshPhase::Failed);
        let leader_change = view
            .filter(|_| walking)
            .and_then(|view| UnitSequencer::new().leader_drift(r, view))
            .map(|(was, now)| LeaderChange {
                was: was.clone(),
                now: now.clone(),
            });

        Self {
            unit: unit.clone(),
            stamp: record.stamp,
            updated_at: record.updated_at,
            refresh_id: r.id.map(|id| id.to_string()),
            phase: r.phase,
            direction: r.direction(),
            pause_policy: r.pause_policy,
            original_version: r.original_version.clone(),
            active_target: r.active_target().cloned(),
            planned_order: r.planned_order.clone(),
            completed: r.completed_units().len(),
            total: r.planned_order.len(),
            next_unit: r.current_unit().cloned(),
            awaiting_confirmation: r.phase == RefreshPhase::Paused,
            step_in_flight: r.step_in_flight.clone(),
            last_error: r.last_error.clone(),
            rollback_command: r.rollback_command.clone(),
            leader_change,
            local_version,
        }
    }

    /// Whether the reporting unit already finished its switch.
    pub fn local_done(&self) -> bool {
        self.planned_order[..self.completed.min(self.total)].contains(&self.unit)
    }
}

/// Status level and message for the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    /// Level.
    pub level: StatusLevel,
    /// One-line message.
    pub message: String,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

/// Formats a [`StatusReport`] for the platform status display.
#[derive(Debug, Default)]
pub struct StatusFormatter;

impl StatusFormatter {
    /// Create a new status formatter.
    pub fn new() -> Self {
        Self
    }

    /// Level and message for the reporting unit.
    pub fn format(&self, report: &StatusReport) -> StatusLine {
        let target = report
            .active_target
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "?".to_string());
        let progress = format!("{}/{} units done", report.completed, report.total);
        let next = report
            .next_unit
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        let (level, mut message) = match report.phase {
            RefreshPhase::Idle => (StatusLevel::Active, String::new()),
            RefreshPhase::PreflightPassed => (
                StatusLevel::Active,
                match &report.rollback_command {
                    Some(cmd) => format!("Ready to refresh; rollback with `{cmd}`"),
                    None => "Ready to refresh".to_string(),
                },
            ),
            RefreshPhase::InProgress | RefreshPhase::RolledBack => {
                let verb = match report.direction {
                    RefreshDirection::Upgrade => "Refreshing",
                    RefreshDirection::Rollback => "Rolling back",
                };
                if report.step_in_flight.as_ref() == Some(&report.unit) {
                    (StatusLevel::Maintenance, format!("{verb} this unit to {target} ({progress})"))
                } else if report.local_done() {
                    (StatusLevel::Active, format!("{verb} to {target} ({progress}); this unit done"))
                } else {
                    (StatusLevel::Waiting, format!("{verb} to {target} ({progress}); next {next}"))
                }
            }
            RefreshPhase::Paused => (
                StatusLevel::Blocked,
                format!("Refresh paused ({progress}); run resume-refresh --unit {next} to continue"),
            ),
            RefreshPhase::Completed => match report.direction {
                RefreshDirection::Upgrade => (
                    StatusLevel::Active,
                    format!("Refreshed to {target}; acknowledge to reset"),
                ),
                RefreshDirection::Rollback => (
                    StatusLevel::Active,
                    format!("Rolled back to {target}; acknowledge to reset"),
                ),
            },
            RefreshPhase::Failed => (
                StatusLevel::Blocked,
                format!(
                    "Refresh failed: {}; run force-abort to roll back",
                    report.last_error.as_deref().unwrap_or("unknown error")
                ),
            ),
        };

        if let Some(change) = &report.leader_change {
            let note = format!("leader changed since planning (was {}, now {})", change.was, change.now);
            if message.is_empty() {
                message = note;
            } else {
                message = format!("{message}; {note}");
            }
        }

        StatusLine { level, message }
    }
}
