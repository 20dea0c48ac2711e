//! Audit trail for refresh transitions.
//!
//! Every applied transition of the shared refresh record is logged as one
//! JSON object on the `keel::audit` target, attributed to the unit that
//! wrote it.

use keel_core::{ClusterRefresh, RefreshDirection, RefreshPhase, UnitId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Preflight passed and a plan was frozen.
    PreflightPassed,
    /// The walk towards a new version started.
    Started,
    /// A unit completed its switch.
    UnitRefreshed,
    /// The walk halted for operator confirmation.
    Paused,
    /// The operator confirmed continuation.
    Resumed,
    /// The operator aborted and a rollback walk started.
    RollbackStarted,
    /// The refresh failed.
    Failed,
    /// Every planned unit completed.
    Completed,
    /// The operator acknowledged the outcome.
    Acknowledged,
}

/// Audit event severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    /// Routine progress.
    Info,
    /// Operator attention advised.
    Warning,
    /// The refresh cannot continue on its own.
    Critical,
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Timestamp in RFC3339 format.
    pub timestamp: String,
    /// Event type.
    pub event_type: AuditEventType,
    /// Severity level.
    pub severity: AuditSeverity,
    /// Unit that wrote the transition.
    pub actor: String,
    /// Refresh run the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_id: Option<String>,
    /// Phase after the transition.
    pub phase: RefreshPhase,
    /// Cursor after the transition.
    pub cursor: usize,
    /// Record stamp after the write.
    pub stamp: u64,
    /// Unit the event concerns, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Additional context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event from the record after the transition.
    pub fn new(event_type: AuditEventType, actor: &UnitId, after: &ClusterRefresh, stamp: u64) -> Self {
        let severity = match event_type {
            AuditEventType::Failed => AuditSeverity::Critical,
            AuditEventType::Paused | AuditEventType::RollbackStarted => AuditSeverity::Warning,
            _ => AuditSeverity::Info,
        };
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            severity,
            actor: actor.to_string(),
            refresh_id: after.id.map(|id| id.to_string()),
            phase: after.phase,
            cursor: after.cursor,
            stamp,
            unit: None,
            message: None,
        }
    }

    /// Set the unit the event concerns.
    pub fn with_unit(mut self, unit: &UnitId) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// Set the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Log the audit event as JSON.
    pub fn log(&self) {
        let json = match serde_json::to_string(self) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit event");
                return;
            }
        };

        match self.severity {
            AuditSeverity::Info => {
                info!(target: "keel::audit", event_type = ?self.event_type, actor = %self.actor, "{}", json);
            }
            AuditSeverity::Warning => {
                warn!(target: "keel::audit", event_type = ?self.event_type, actor = %self.actor, "{}", json);
            }
            AuditSeverity::Critical => {
                tracing::error!(target: "keel::audit", event_type = ?self.event_type, actor = %self.actor, "{}", json);
            }
        }
    }
}

/// Derive the audit events for a write that moved `before` to `after`.
///
/// A single write can produce more than one event: the last unit's
/// completion also completes the refresh, and a completion under a pause
/// policy also pauses it.
pub fn classify(before: &ClusterRefresh, after: &ClusterRefresh) -> Vec<AuditEventType> {
    use RefreshPhase::*;

    let mut events = Vec::new();
    match (before.phase, after.phase) {
        (_, Idle) if before.phase != Idle => {
            events.push(AuditEventType::Acknowledged);
            return events;
        }
        (_, PreflightPassed) => {
            events.push(AuditEventType::PreflightPassed);
            return events;
        }
        (PreflightPassed, InProgress) => events.push(AuditEventType::Started),
        (Paused, InProgress) => events.push(AuditEventType::Resumed),
        (from, RolledBack) if from != RolledBack => {
            events.push(AuditEventType::RollbackStarted);
            return events;
        }
        _ => {}
    }

    if after.cursor > before.cursor && before.phase.is_walking() {
        events.push(AuditEventType::UnitRefreshed);
    }

    match (before.phase, after.phase) {
        (InProgress, Paused) => events.push(AuditEventType::Paused),
        (from, Completed) if from != Completed => events.push(AuditEventType::Completed),
        (from, Failed) if from != Failed => events.push(AuditEventType::Failed),
        _ => {}
    }
    events
}

/// Writes audit events on behalf of one unit.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    actor: UnitId,
}

impl AuditLogger {
    /// Create a logger for `actor`.
    pub fn new(actor: UnitId) -> Self {
        Self { actor }
    }

    /// Build the events for a persisted transition without logging them.
    pub fn events_for(&self, before: &ClusterRefresh, after: &ClusterRefresh, stamp: u64) -> Vec<AuditEvent> {
        classify(before, after)
            .into_iter()
            .map(|kind| {
                let event = AuditEvent::new(kind, &self.actor, after, stamp);
                match kind {
                    AuditEventType::UnitRefreshed => match before.current_unit() {
                        Some(unit) => event.with_unit(unit),
                        None => event,
                    },
                    AuditEventType::Paused | AuditEventType::Resumed => match after.current_unit() {
                        Some(unit) => event.with_unit(unit),
                        None => event,
                    },
                    AuditEventType::Started => match after.target_version.as_ref() {
                        Some(target) => event.with_message(format!("refreshing to {target}")),
                        None => event,
                    },
                    AuditEventType::RollbackStarted => match after.original_version.as_ref() {
                        Some(original) => event.with_message(format!("rolling back to {original}")),
                        None => event,
                    },
                    AuditEventType::Completed if after.direction() == RefreshDirection::Rollback => {
                        event.with_message("rollback completed")
                    }
                    AuditEventType::Failed => match after.last_error.as_ref() {
                        Some(error) => event.with_message(error.clone()),
                        None => event,
                    },
                    _ => event,
                }
            })
            .collect()
    }

    /// Log the events for a persisted transition.
    pub fn record(&self, before: &ClusterRefresh, after: &ClusterRefresh, stamp: u64) {
        for event in self.events_for(before, after, stamp) {
            event.log();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{PausePolicy, RefreshId, VersionPair};

    fn unit(id: &str) -> UnitId {
        UnitId::parse(id).unwrap()
    }

    fn walking(cursor: usize) -> ClusterRefresh {
        ClusterRefresh {
            id: Some(RefreshId::new()),
            original_version: Some(VersionPair::new("14", "r1")),
            target_version: Some(VersionPair::new("16", "r2")),
            phase: RefreshPhase::InProgress,
            pause_policy: PausePolicy::None,
            planned_order: vec![unit("db/0"), unit("db/1"), unit("db/2")],
            cursor,
            ..ClusterRefresh::idle()
        }
    }

    #[test]
    fn step_marker_is_not_audited() {
        let before = walking(0);
        let after = ClusterRefresh {
            step_in_flight: Some(unit("db/0")),
            ..before.clone()
        };
        assert!(classify(&before, &after).is_empty());
    }

    #[test]
    fn last_unit_completes_refresh() {
        let before = walking(2);
        let after = ClusterRefresh {
            cursor: 3,
            phase: RefreshPhase::Completed,
            ..before.clone()
        };
        assert_eq!(
            classify(&before, &after),
            vec![AuditEventType::UnitRefreshed, AuditEventType::Completed]
        );
    }

    #[test]
    fn completion_under_pause_policy() {
        let before = walking(0);
        let after = ClusterRefresh {
            cursor: 1,
            phase: RefreshPhase::Paused,
            ..before.clone()
        };
        assert_eq!(
            classify(&before, &after),
            vec![AuditEventType::UnitRefreshed, AuditEventType::Paused]
        );
    }

    #[test]
    fn operator_transitions() {
        let paused = ClusterRefresh {
            phase: RefreshPhase::Paused,
            ..walking(1)
        };
        assert_eq!(classify(&paused, &walking(1)), vec![AuditEventType::Resumed]);

        let rolled_back = ClusterRefresh {
            phase: RefreshPhase::RolledBack,
            cursor: 0,
            ..walking(1)
        };
        assert_eq!(classify(&paused, &rolled_back), vec![AuditEventType::RollbackStarted]);

        let completed = ClusterRefresh {
            phase: RefreshPhase::Completed,
            cursor: 3,
            ..walking(3)
        };
        assert_eq!(
            classify(&completed, &ClusterRefresh::idle()),
            vec![AuditEventType::Acknowledged]
        );
    }

    #[test]
    fn failure_is_critical() {
        let before = walking(1);
        let after = ClusterRefresh {
            phase: RefreshPhase::Failed,
            last_error: Some("db/1: probe failed".into()),
            ..before.clone()
        };
        let logger = AuditLogger::new(unit("db/1"));
        let events = logger.events_for(&before, &after, 7);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, AuditSeverity::Critical);
        assert_eq!(events[0].message.as_deref(), Some("db/1: probe failed"));
        assert_eq!(events[0].stamp, 7);
    }
}
