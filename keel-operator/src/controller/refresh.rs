//! Per-unit refresh reconciliation.

use keel_core::{
    ClusterRefresh, Effect, RefreshEvent, RefreshPhase, Transition, TransitionError, VersionPair,
    VersionedRefresh, evaluate,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{ControllerContext, ReconcileAction, WriteOutcome};
use crate::error::{OperatorResult, WorkloadError};
use crate::signal::LifecycleSignal;

/// Drives one unit's part of a rolling refresh.
///
/// Each call to [`handle`](Self::handle) reloads the shared record and acts
/// only if this unit is the one whose turn it is. Paused walks are a state,
/// not a wait: the controller returns and is re-entered on the next signal.
pub struct RefreshController {
    ctx: Arc<ControllerContext>,
}

impl RefreshController {
    /// Create a new refresh controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<ControllerContext> {
        &self.ctx
    }

    /// React to one lifecycle signal.
    pub async fn handle(&self, signal: &LifecycleSignal) -> OperatorResult<ReconcileAction> {
        let unit = &self.ctx.unit;
        let mut record = self.ctx.load().await?;
        debug!(
            unit = %unit,
            %signal,
            phase = %record.refresh.phase,
            cursor = record.refresh.cursor,
            stamp = record.stamp,
            "Handling signal"
        );

        if let LifecycleSignal::RefreshAvailable { target_version } = signal {
            match self.start(&record, target_version).await? {
                Some(updated) => record = updated,
                None => return Ok(ReconcileAction::requeue_short()),
            }
        }

        match record.refresh.phase {
            RefreshPhase::InProgress | RefreshPhase::RolledBack => {}
            RefreshPhase::Paused => {
                if record.refresh.current_unit() == Some(unit) {
                    info!(unit = %unit, "Refresh paused; awaiting operator confirmation to refresh this unit");
                }
                return Ok(ReconcileAction::requeue_medium());
            }
            phase => {
                debug!(unit = %unit, %phase, "No walk in progress");
                return Ok(ReconcileAction::Done);
            }
        }

        if !self.ctx.sequencer.is_permitted(&record.refresh, unit) {
            debug!(
                unit = %unit,
                next = ?record.refresh.current_unit(),
                "Waiting for turn"
            );
            return Ok(ReconcileAction::requeue_medium());
        }

        self.step(record).await
    }

    /// Apply `Start`; only the first unit of the plan does this.
    ///
    /// Returns the record to continue with, or `None` when a write was lost.
    async fn start(
        &self,
        record: &VersionedRefresh,
        target: &VersionPair,
    ) -> OperatorResult<Option<VersionedRefresh>> {
        let unit = &self.ctx.unit;
        let refresh = &record.refresh;

        if refresh.phase == RefreshPhase::Idle {
            warn!(
                unit = %unit,
                target = %target,
                "New version available but pre-refresh-check has not passed"
            );
            return Ok(Some(record.clone()));
        }

        if refresh.phase == RefreshPhase::PreflightPassed && refresh.planned_order.first() != Some(unit) {
            debug!(unit = %unit, "Start is applied by the first planned unit");
            return Ok(Some(record.clone()));
        }

        let transition = match evaluate(refresh, RefreshEvent::Start {
            target_version: target.clone(),
        }) {
            Ok(t) => t,
            Err(e @ (TransitionError::TargetMismatch { .. } | TransitionError::SameVersion { .. })) => {
                error!(unit = %unit, error = %e, "Refusing new version");
                return Ok(Some(record.clone()));
            }
            Err(e) => {
                warn!(unit = %unit, error = %e, "New version ignored; run pre-refresh-check first");
                return Ok(Some(record.clone()));
            }
        };

        match self.ctx.persist(record, &transition).await? {
            WriteOutcome::Applied { stamp } => {
                info!(unit = %unit, target = %target, "Refresh started");
                Ok(Some(written(transition.next, stamp)))
            }
            WriteOutcome::Unchanged => Ok(Some(record.clone())),
            WriteOutcome::Conflict { .. } => Ok(None),
        }
    }

    /// Evaluate this unit's turn and carry out the resulting effects.
    async fn step(&self, record: VersionedRefresh) -> OperatorResult<ReconcileAction> {
        let unit = &self.ctx.unit;
        let view = self.ctx.topology.topology().await?;
        let ops = self.ctx.operations.operations_in_flight().await?;

        if let Some((was, now)) = self.ctx.sequencer.leader_drift(&record.refresh, &view) {
            warn!(
                unit = %unit,
                was = %was,
                now = %now,
                "Leader changed since planning; keeping the frozen plan"
            );
        }

        let local_version = match self.ctx.workload.local_version().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(unit = %unit, error = %e, "Local version unknown");
                None
            }
        };

        let verdict = self.ctx.gate.can_proceed(
            unit,
            &view,
            &ops,
            &record.refresh,
            local_version.as_ref(),
        );
        let transition = evaluate(
            &record.refresh,
            RefreshEvent::Evaluate {
                unit: unit.clone(),
                verdict,
                local_version,
            },
        )?;

        let record = match self.ctx.persist(&record, &transition).await? {
            WriteOutcome::Applied { stamp } => written(transition.next.clone(), stamp),
            WriteOutcome::Unchanged => record,
            WriteOutcome::Conflict { .. } => return Ok(ReconcileAction::requeue_short()),
        };

        self.apply_effects(record, &transition).await
    }

    async fn apply_effects(
        &self,
        record: VersionedRefresh,
        transition: &Transition,
    ) -> OperatorResult<ReconcileAction> {
        let unit = &self.ctx.unit;
        for effect in &transition.effects {
            match effect {
                Effect::Persist => {}
                Effect::SwitchWorkload { target, .. } => {
                    return self.switch(record, target).await;
                }
                Effect::VerifySwitch { target, .. } => {
                    return self.verify(record, target).await;
                }
                Effect::AwaitConfirmation { unit: waiting } => {
                    info!(unit = %waiting, "Refresh paused; run resume-refresh to continue");
                    return Ok(ReconcileAction::Done);
                }
                Effect::RetryLater { reason, .. } => {
                    info!(unit = %unit, reason = %reason, "Health gate failed; will retry");
                    return Ok(ReconcileAction::Backoff);
                }
                Effect::Escalate { reason } => {
                    error!(unit = %unit, reason = %reason, "Refresh failed");
                    return Ok(ReconcileAction::Done);
                }
            }
        }

        if transition.applied {
            debug!(unit = %unit, phase = %record.refresh.phase, "Step recorded");
        }
        Ok(ReconcileAction::Done)
    }

    /// Switch the local workload, probe it, and record the outcome.
    ///
    /// The step marker is already persisted. A lost completion write is
    /// recovered on the next signal: the unit then reports the target
    /// version and is verified without switching again.
    async fn switch(
        &self,
        record: VersionedRefresh,
        target: &VersionPair,
    ) -> OperatorResult<ReconcileAction> {
        info!(unit = %self.ctx.unit, target = %target, "Switching workload version");
        let outcome = match self.ctx.workload.switch_version(target).await {
            Ok(()) => self.probe().await,
            Err(e) => Err(e),
        };
        self.record_outcome(record, target, outcome).await
    }

    /// Probe a unit that already runs `target` before it counts as completed.
    async fn verify(
        &self,
        record: VersionedRefresh,
        target: &VersionPair,
    ) -> OperatorResult<ReconcileAction> {
        info!(unit = %self.ctx.unit, target = %target, "Workload already on target; probing");
        let outcome = self.probe().await;
        self.record_outcome(record, target, outcome).await
    }

    async fn record_outcome(
        &self,
        record: VersionedRefresh,
        target: &VersionPair,
        outcome: Result<(), WorkloadError>,
    ) -> OperatorResult<ReconcileAction> {
        let unit = &self.ctx.unit;
        let event = match outcome {
            Ok(()) => {
                info!(unit = %unit, target = %target, "Workload healthy on target");
                RefreshEvent::UnitCompleted { unit: unit.clone() }
            }
            Err(e) => {
                error!(unit = %unit, target = %target, error = %e, "Workload unhealthy on target");
                RefreshEvent::SwitchFailed {
                    unit: unit.clone(),
                    reason: e.to_string(),
                }
            }
        };

        let transition = evaluate(&record.refresh, event)?;
        match self.ctx.persist(&record, &transition).await? {
            WriteOutcome::Applied { .. } | WriteOutcome::Unchanged => {}
            WriteOutcome::Conflict { current } => {
                warn!(
                    unit = %unit,
                    stamp = current.stamp,
                    "Refresh record moved during the step; re-evaluating"
                );
                return Ok(ReconcileAction::requeue_short());
            }
        }

        if transition.next.phase == RefreshPhase::Failed {
            error!(unit = %unit, "Refresh failed; run force-abort to roll back or fix forward");
        }
        Ok(ReconcileAction::Done)
    }

    /// Post-switch probe, bounded by the configured timeout.
    async fn probe(&self) -> Result<(), WorkloadError> {
        let timeout = self.ctx.config.probe_timeout();
        tokio::time::timeout(timeout, self.ctx.workload.probe())
            .await
            .map_err(|_| WorkloadError::Timeout {
                command: "post-switch probe".to_string(),
                after: timeout,
            })?
    }
}

/// The record as stored by an applied compare-and-swap.
fn written(refresh: ClusterRefresh, stamp: u64) -> VersionedRefresh {
    VersionedRefresh {
        stamp,
        refresh,
        updated_at: Some(chrono::Utc::now()),
    }
}
