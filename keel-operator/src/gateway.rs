//! Operator actions.
//!
//! Every action is idempotent and safe to retry. Actions that change the
//! record write it through the same stamped compare-and-swap the units use,
//! reloading and re-evaluating when another writer got there first.

use keel_core::{
    ClusterRefresh, RefreshEvent, RefreshId, RefreshPhase, Transition, TransitionError, UnitId,
    VersionedRefresh, evaluate,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::controller::{ControllerContext, WriteOutcome};
use crate::error::OperatorResult;
use crate::status::{StatusFormatter, StatusReport};

/// Attempts at a contended write before reporting the record busy.
const WRITE_ATTEMPTS: usize = 3;

/// Outcome class of an action, mapped to the platform's result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOutcome {
    /// The action did what was asked, or there was nothing to do.
    Success,
    /// The action cannot proceed until the operator or the cluster changes
    /// something; retrying later may succeed.
    Blocked,
    /// The action was rejected or could not be carried out.
    Failed,
}

impl ActionOutcome {
    /// Process exit code for the outcome.
    pub const fn exit_code(self) -> i32 {
        match self {
            ActionOutcome::Success => 0,
            ActionOutcome::Failed => 1,
            ActionOutcome::Blocked => 2,
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionOutcome::Success => "success",
            ActionOutcome::Blocked => "blocked",
            ActionOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of an operator action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Outcome class.
    pub outcome: ActionOutcome,
    /// Human-readable detail.
    pub message: String,
    /// Structured detail.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl ActionResult {
    /// A successful result.
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ActionOutcome::Success, message)
    }

    /// A blocked result.
    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(ActionOutcome::Blocked, message)
    }

    /// A failed result.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ActionOutcome::Failed, message)
    }

    fn new(outcome: ActionOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    /// Attach structured data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Result of evaluating and writing an operator event.
enum Applied {
    Written {
        before: VersionedRefresh,
        transition: Transition,
    },
    Rejected(TransitionError),
    Contended,
}

/// Operator-invocable actions hosted by one unit.
pub struct ActionGateway {
    ctx: Arc<ControllerContext>,
}

impl ActionGateway {
    /// Create a gateway over a controller context.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Evaluate the event built by `event_for` against the current record
    /// and write it, retrying lost writes.
    async fn apply<F>(&self, mut event_for: F) -> OperatorResult<Applied>
    where
        F: FnMut(&ClusterRefresh) -> RefreshEvent,
    {
        for _ in 0..WRITE_ATTEMPTS {
            let before = self.ctx.load().await?;
            let transition = match evaluate(&before.refresh, event_for(&before.refresh)) {
                Ok(t) => t,
                Err(e) => return Ok(Applied::Rejected(e)),
            };
            match self.ctx.persist(&before, &transition).await? {
                WriteOutcome::Applied { .. } | WriteOutcome::Unchanged => {
                    return Ok(Applied::Written { before, transition });
                }
                WriteOutcome::Conflict { .. } => continue,
            }
        }
        Ok(Applied::Contended)
    }

    /// Run the cluster preflight and, on success, freeze a plan.
    ///
    /// A pass reports the command that restores the version running now.
    pub async fn pre_refresh_check(&self) -> OperatorResult<ActionResult> {
        let record = self.ctx.load().await?;
        match record.refresh.phase {
            RefreshPhase::Idle | RefreshPhase::Completed | RefreshPhase::PreflightPassed => {}
            RefreshPhase::Failed => {
                return Ok(ActionResult::blocked(
                    "Previous refresh failed; run force-abort or acknowledge first",
                ));
            }
            phase => {
                return Ok(ActionResult::blocked(format!("A refresh is already {phase}")));
            }
        }

        let ops = self.ctx.operations.operations_in_flight().await?;
        let view = match self.ctx.topology.topology().await {
            Ok(view) => view,
            Err(e) => {
                warn!(unit = %self.ctx.unit, error = %e, "Preflight could not read topology");
                return Ok(ActionResult::blocked(format!("Preflight failed: {e}")));
            }
        };

        if let Err(failure) = self.ctx.gate.preflight(&view, &ops) {
            warn!(unit = %self.ctx.unit, reason = %failure, "Preflight failed");
            return Ok(ActionResult::blocked(format!("Preflight failed: {failure}"))
                .with_data(json!({ "failure": failure })));
        }

        let original = match self.ctx.workload.local_version().await {
            Ok(v) => v,
            Err(e) => {
                return Ok(ActionResult::failed(format!(
                    "Cannot determine the running version: {e}"
                )));
            }
        };
        let plan = self.ctx.sequencer.plan(&view);
        let rollback_command = self.ctx.config.render_rollback_command(&original);
        let policy = self.ctx.config.pause_policy;
        let leader = view.leader().cloned();

        let applied = self
            .apply(|_| RefreshEvent::PreflightPassed {
                refresh_id: RefreshId::new(),
                original_version: original.clone(),
                planned_order: plan.clone(),
                pause_policy: policy,
                leader: leader.clone(),
                rollback_command: Some(rollback_command.clone()),
            })
            .await?;

        Ok(match applied {
            Applied::Written { transition, .. } => {
                let next = &transition.next;
                info!(
                    unit = %self.ctx.unit,
                    plan = ?next.planned_order,
                    "Preflight passed"
                );
                ActionResult::success(format!(
                    "Preflight passed; to roll back run: {rollback_command}"
                ))
                .with_data(json!({
                    "refreshId": next.id.map(|id| id.to_string()),
                    "originalVersion": original,
                    "plannedOrder": next.planned_order,
                    "pausePolicy": policy,
                    "rollbackCommand": rollback_command,
                }))
            }
            Applied::Rejected(e) => ActionResult::blocked(e.to_string()),
            Applied::Contended => busy(),
        })
    }

    /// Confirm that the paused walk may continue with `unit_hint`.
    ///
    /// A hint the walk has already passed is a no-op.
    pub async fn resume_refresh(&self, unit_hint: &str) -> OperatorResult<ActionResult> {
        let hint = match UnitId::parse(unit_hint) {
            Ok(u) => u,
            Err(e) => return Ok(ActionResult::failed(e.to_string())),
        };

        let applied = self
            .apply(|_| RefreshEvent::Resume {
                unit_hint: hint.clone(),
            })
            .await?;

        Ok(match applied {
            Applied::Written { transition, .. } if transition.applied => {
                info!(unit = %self.ctx.unit, hint = %hint, "Refresh resumed");
                ActionResult::success(format!("Refresh resumed; {hint} refreshes next"))
            }
            Applied::Written { .. } => {
                ActionResult::success(format!("Refresh is already past {hint}; nothing to resume"))
            }
            Applied::Rejected(e @ TransitionError::InvalidTransition { .. }) => {
                ActionResult::failed(format!("Nothing to resume: {e}"))
            }
            Applied::Rejected(e) => ActionResult::failed(e.to_string()),
            Applied::Contended => busy(),
        })
    }

    /// Read-only status projection.
    pub async fn status(&self) -> OperatorResult<ActionResult> {
        let record = self.ctx.load().await?;
        let view = self.ctx.topology.topology().await.ok();
        let local = self.ctx.workload.local_version().await.ok();

        let report = StatusReport::project(&self.ctx.unit, &record, view.as_ref(), local);
        let line = StatusFormatter::new().format(&report);
        Ok(ActionResult::success(line.message.clone()).with_data(json!({
            "level": line.level,
            "report": report,
        })))
    }

    /// Abort the walk and roll every unit back to the original version.
    ///
    /// Rejected while a unit is switching; retry once the step completes.
    pub async fn force_abort(&self) -> OperatorResult<ActionResult> {
        let view = match self.ctx.topology.topology().await {
            Ok(view) => view,
            Err(e) => {
                return Ok(ActionResult::blocked(format!("Cannot plan rollback: {e}")));
            }
        };
        let order = self.ctx.sequencer.plan_rollback(&view);

        let applied = self
            .apply(|_| RefreshEvent::Abort {
                rollback_order: order.clone(),
            })
            .await?;

        Ok(match applied {
            Applied::Written { transition, .. } if transition.applied => {
                let next = &transition.next;
                let original = next
                    .original_version
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                warn!(unit = %self.ctx.unit, original = %original, "Refresh aborted; rolling back");
                ActionResult::success(format!("Rolling back to {original}"))
                    .with_data(json!({ "rollbackOrder": next.planned_order }))
            }
            Applied::Written { .. } => ActionResult::success("Rollback already in progress"),
            Applied::Rejected(e @ TransitionError::StepInFlight { .. }) => {
                ActionResult::blocked(e.to_string())
            }
            Applied::Rejected(e) => ActionResult::failed(e.to_string()),
            Applied::Contended => busy(),
        })
    }

    /// Reset a completed or failed refresh to idle.
    pub async fn acknowledge(&self) -> OperatorResult<ActionResult> {
        let applied = self.apply(|_| RefreshEvent::Acknowledge).await?;

        Ok(match applied {
            Applied::Written { before, transition } if transition.applied => {
                info!(unit = %self.ctx.unit, was = %before.refresh.phase, "Refresh acknowledged");
                ActionResult::success(format!(
                    "Acknowledged {} refresh",
                    before.refresh.phase
                ))
            }
            Applied::Written { .. } => ActionResult::success("Nothing to acknowledge"),
            Applied::Rejected(e) => ActionResult::failed(e.to_string()),
            Applied::Contended => busy(),
        })
    }
}

fn busy() -> ActionResult {
    ActionResult::blocked("Refresh record is being updated concurrently; retry the action")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(ActionOutcome::Success.exit_code(), 0);
        assert_eq!(ActionOutcome::Failed.exit_code(), 1);
        assert_eq!(ActionOutcome::Blocked.exit_code(), 2);
    }

    #[test]
    fn result_serializes_without_null_data() {
        let json = serde_json::to_value(ActionResult::blocked("backup in progress")).unwrap();
        assert_eq!(json, json!({ "outcome": "blocked", "message": "backup in progress" }));

        let json = serde_json::to_value(ActionResult::success("ok").with_data(json!({ "a": 1 }))).unwrap();
        assert_eq!(json["data"]["a"], 1);
    }
}
