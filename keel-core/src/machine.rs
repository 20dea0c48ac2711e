//! Pure refresh state machine.
//!
//! [`evaluate`] maps the current [`ClusterRefresh`] and one [`RefreshEvent`]
//! to the next record plus the [`Effect`]s the caller must carry out. It
//! performs no I/O and reads no clock, so every transition can be exercised
//! without a live cluster.
//!
//! ```text
//! Idle --preflight--> PreflightPassed --start--> InProgress --all done--> Completed
//!                                                 |    ^                      |
//!                                    confirmation |    | resume               | acknowledge
//!                                                 v    |                      v
//!                                                 Paused                     Idle
//! InProgress | Paused | Failed --abort--> RolledBack --all done--> Completed
//! InProgress | RolledBack --switch failed--> Failed --acknowledge--> Idle
//! ```
//!
//! Events delivered more than once are absorbed: a transition that would not
//! change the record comes back with `applied == false` and no effects.

use std::fmt;

use crate::error::TransitionError;
use crate::gate::{GateFailure, GateVerdict};
use crate::refresh::{ClusterRefresh, PausePolicy, RefreshDirection, RefreshPhase};
use crate::types::{RefreshId, UnitId, VersionPair};

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    /// Cluster preflight passed; freeze the plan.
    PreflightPassed {
        /// Identifier for the new run.
        refresh_id: RefreshId,
        /// Version the cluster runs now.
        original_version: VersionPair,
        /// Unit order computed by the sequencer.
        planned_order: Vec<UnitId>,
        /// Operator pause policy.
        pause_policy: PausePolicy,
        /// Leader at planning time.
        leader: Option<UnitId>,
        /// Command that restores `original_version`.
        rollback_command: Option<String>,
    },
    /// The platform made a new version available.
    Start {
        /// Version to move to.
        target_version: VersionPair,
    },
    /// A unit re-evaluated its turn.
    Evaluate {
        /// Evaluating unit.
        unit: UnitId,
        /// Health gate outcome for the unit.
        verdict: GateVerdict,
        /// Version the unit's workload reports, if known.
        local_version: Option<VersionPair>,
    },
    /// A unit finished its switch and passed its post-switch probe.
    UnitCompleted {
        /// The unit.
        unit: UnitId,
    },
    /// A unit failed to come up on the new version.
    SwitchFailed {
        /// The unit.
        unit: UnitId,
        /// Failure detail.
        reason: String,
    },
    /// Operator confirmed continuation.
    Resume {
        /// Unit the operator expects to refresh next.
        unit_hint: UnitId,
    },
    /// Operator requested a rollback.
    Abort {
        /// Order for the rollback walk.
        rollback_order: Vec<UnitId>,
    },
    /// A failure that makes progress impossible.
    UnrecoverableError {
        /// Failure detail.
        reason: String,
    },
    /// Operator acknowledged a finished or failed refresh.
    Acknowledge,
}

impl RefreshEvent {
    /// Event name used in errors and logs.
    pub const fn name(&self) -> &'static str {
        match self {
            RefreshEvent::PreflightPassed { .. } => "PreflightPassed",
            RefreshEvent::Start { .. } => "Start",
            RefreshEvent::Evaluate { .. } => "Evaluate",
            RefreshEvent::UnitCompleted { .. } => "UnitCompleted",
            RefreshEvent::SwitchFailed { .. } => "SwitchFailed",
            RefreshEvent::Resume { .. } => "Resume",
            RefreshEvent::Abort { .. } => "Abort",
            RefreshEvent::UnrecoverableError { .. } => "UnrecoverableError",
            RefreshEvent::Acknowledge => "Acknowledge",
        }
    }
}

impl fmt::Display for RefreshEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Work the caller must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write `next` to the shared store.
    Persist,
    /// Switch the unit's workload. Only issued once the step marker is
    /// persisted.
    SwitchWorkload {
        /// Unit to switch.
        unit: UnitId,
        /// Version to switch to.
        target: VersionPair,
    },
    /// The unit already runs `target`; run the post-switch probe and report
    /// `UnitCompleted` or `SwitchFailed`.
    VerifySwitch {
        /// Unit to probe.
        unit: UnitId,
        /// Version the unit reports.
        target: VersionPair,
    },
    /// The walk halted for operator confirmation before `unit`.
    AwaitConfirmation {
        /// Unit waiting to refresh.
        unit: UnitId,
    },
    /// Transient gate failure; evaluate again later.
    RetryLater {
        /// Unit that was gated.
        unit: UnitId,
        /// Why it was gated.
        reason: GateFailure,
    },
    /// The refresh failed; operator intervention is required.
    Escalate {
        /// Failure detail.
        reason: String,
    },
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Record after the event.
    pub next: ClusterRefresh,
    /// Work to carry out, in order.
    pub effects: Vec<Effect>,
    /// Whether `next` differs from the input record.
    pub applied: bool,
}

impl Transition {
    fn unchanged(current: &ClusterRefresh) -> Self {
        Self {
            next: current.clone(),
            effects: Vec::new(),
            applied: false,
        }
    }

    fn unchanged_with(current: &ClusterRefresh, effect: Effect) -> Self {
        Self {
            next: current.clone(),
            effects: vec![effect],
            applied: false,
        }
    }

    fn persist(next: ClusterRefresh) -> Self {
        Self {
            next,
            effects: vec![Effect::Persist],
            applied: true,
        }
    }

    fn then(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Whether the transition asks for a workload switch.
    pub fn switch_target(&self) -> Option<&VersionPair> {
        self.effects.iter().find_map(|e| match e {
            Effect::SwitchWorkload { target, .. } => Some(target),
            _ => None,
        })
    }
}

/// Apply `event` to `current`.
pub fn evaluate(
    current: &ClusterRefresh,
    event: RefreshEvent,
) -> Result<Transition, TransitionError> {
    let name = event.name();
    let invalid = || TransitionError::InvalidTransition {
        phase: current.phase,
        event: name,
    };

    match event {
        RefreshEvent::PreflightPassed {
            refresh_id,
            original_version,
            planned_order,
            pause_policy,
            leader,
            rollback_command,
        } => {
            if !matches!(
                current.phase,
                RefreshPhase::Idle | RefreshPhase::Completed | RefreshPhase::PreflightPassed
            ) {
                return Err(invalid());
            }
            if planned_order.is_empty() {
                return Err(TransitionError::EmptyPlan);
            }
            Ok(Transition::persist(ClusterRefresh {
                id: Some(refresh_id),
                original_version: Some(original_version),
                phase: RefreshPhase::PreflightPassed,
                pause_policy,
                planned_order,
                leader_at_planning: leader,
                rollback_command,
                ..ClusterRefresh::idle()
            }))
        }

        RefreshEvent::Start { target_version } => start(current, target_version, invalid),

        RefreshEvent::Evaluate {
            unit,
            verdict,
            local_version,
        } => evaluate_unit(current, unit, verdict, local_version),

        RefreshEvent::UnitCompleted { unit } => {
            let position = position(current, &unit)?;
            if position < current.cursor {
                return Ok(Transition::unchanged(current));
            }
            if !current.phase.is_walking() {
                return Err(invalid());
            }
            if position > current.cursor {
                return Err(not_permitted(current, unit));
            }
            Ok(advance(current))
        }

        RefreshEvent::SwitchFailed { unit, reason } => {
            let position = position(current, &unit)?;
            if current.phase == RefreshPhase::Failed && position == current.cursor {
                return Ok(Transition::unchanged(current));
            }
            if !current.phase.is_walking() {
                return Err(invalid());
            }
            if position != current.cursor {
                return Err(not_permitted(current, unit));
            }
            let detail = format!("{unit}: {reason}");
            Ok(fail(current, detail))
        }

        RefreshEvent::Resume { unit_hint } => {
            if current.phase == RefreshPhase::Idle {
                return Err(invalid());
            }
            let position = position(current, &unit_hint)?;
            if position < current.cursor {
                return Ok(Transition::unchanged(current));
            }
            match current.phase {
                RefreshPhase::Paused if position == current.cursor => {
                    Ok(Transition::persist(ClusterRefresh {
                        phase: RefreshPhase::InProgress,
                        confirmed_cursor: Some(current.cursor),
                        ..current.clone()
                    }))
                }
                RefreshPhase::Paused => Err(TransitionError::UnexpectedUnitHint {
                    hint: unit_hint,
                    expected: current
                        .current_unit()
                        .cloned()
                        .ok_or(TransitionError::EmptyPlan)?,
                }),
                RefreshPhase::InProgress
                    if position == current.cursor
                        && current.confirmed_cursor == Some(current.cursor) =>
                {
                    Ok(Transition::unchanged(current))
                }
                _ => Err(invalid()),
            }
        }

        RefreshEvent::Abort { rollback_order } => {
            match current.phase {
                RefreshPhase::RolledBack => return Ok(Transition::unchanged(current)),
                RefreshPhase::InProgress | RefreshPhase::Paused | RefreshPhase::Failed => {}
                _ => return Err(invalid()),
            }
            if let Some(unit) = &current.step_in_flight {
                return Err(TransitionError::StepInFlight { unit: unit.clone() });
            }
            if rollback_order.is_empty() {
                return Err(TransitionError::EmptyPlan);
            }
            let rollback_of = current
                .rollback_of
                .clone()
                .or_else(|| current.target_version.clone())
                .ok_or_else(invalid)?;
            Ok(Transition::persist(ClusterRefresh {
                phase: RefreshPhase::RolledBack,
                planned_order: rollback_order,
                cursor: 0,
                rollback_of: Some(rollback_of),
                confirmed_cursor: None,
                step_in_flight: None,
                last_error: None,
                ..current.clone()
            }))
        }

        RefreshEvent::UnrecoverableError { reason } => match current.phase {
            RefreshPhase::Failed => Ok(Transition::unchanged(current)),
            RefreshPhase::PreflightPassed
            | RefreshPhase::InProgress
            | RefreshPhase::Paused
            | RefreshPhase::RolledBack => Ok(fail(current, reason)),
            _ => Err(invalid()),
        },

        RefreshEvent::Acknowledge => match current.phase {
            RefreshPhase::Idle => Ok(Transition::unchanged(current)),
            RefreshPhase::Completed | RefreshPhase::Failed => {
                Ok(Transition::persist(ClusterRefresh::idle()))
            }
            _ => Err(invalid()),
        },
    }
}

fn start(
    current: &ClusterRefresh,
    target: VersionPair,
    invalid: impl Fn() -> TransitionError,
) -> Result<Transition, TransitionError> {
    if current.phase == RefreshPhase::PreflightPassed {
        if current.original_version.as_ref() == Some(&target) {
            return Err(TransitionError::SameVersion { version: target });
        }
        return Ok(Transition::persist(ClusterRefresh {
            phase: RefreshPhase::InProgress,
            target_version: Some(target),
            cursor: 0,
            confirmed_cursor: None,
            step_in_flight: None,
            last_error: None,
            ..current.clone()
        }));
    }

    // Redelivered availability signal for the walk already running.
    if current.phase != RefreshPhase::Idle
        && (current.target_version.as_ref() == Some(&target)
            || current.active_target() == Some(&target))
    {
        return Ok(Transition::unchanged(current));
    }

    match (current.phase, current.active_target()) {
        (
            RefreshPhase::InProgress | RefreshPhase::Paused | RefreshPhase::RolledBack,
            Some(active),
        ) => Err(TransitionError::TargetMismatch {
            current: active.clone(),
            requested: target,
        }),
        _ => Err(invalid()),
    }
}

fn evaluate_unit(
    current: &ClusterRefresh,
    unit: UnitId,
    verdict: GateVerdict,
    local_version: Option<VersionPair>,
) -> Result<Transition, TransitionError> {
    if !current.phase.is_walking() {
        if current.phase == RefreshPhase::Paused && current.current_unit() == Some(&unit) {
            return Ok(Transition::unchanged_with(
                current,
                Effect::AwaitConfirmation { unit },
            ));
        }
        return Ok(Transition::unchanged(current));
    }

    let position = position(current, &unit)?;
    if position != current.cursor {
        return Err(not_permitted(current, unit));
    }
    let Some(target) = current.active_target().cloned() else {
        return Err(TransitionError::InvalidTransition {
            phase: current.phase,
            event: "Evaluate",
        });
    };

    // The unit already runs the target: a completion write that never landed,
    // or a unit the walk never had to switch. It still has to pass the
    // post-switch probe before the cursor moves.
    if local_version.as_ref() == Some(&target) {
        return Ok(Transition::unchanged_with(
            current,
            Effect::VerifySwitch { unit, target },
        ));
    }

    // This unit started its switch earlier and was interrupted. Switching
    // again is idempotent.
    if current.step_in_flight.as_ref() == Some(&unit) {
        return Ok(Transition::unchanged_with(
            current,
            Effect::SwitchWorkload { unit, target },
        ));
    }

    match verdict {
        GateVerdict::Pass => Ok(Transition::persist(ClusterRefresh {
            step_in_flight: Some(unit.clone()),
            ..current.clone()
        })
        .then(Effect::SwitchWorkload { unit, target })),
        GateVerdict::Fail(failure)
            if failure.is_confirmation()
                && current.direction() == RefreshDirection::Upgrade =>
        {
            Ok(Transition::persist(ClusterRefresh {
                phase: RefreshPhase::Paused,
                ..current.clone()
            })
            .then(Effect::AwaitConfirmation { unit }))
        }
        GateVerdict::Fail(reason) => Ok(Transition::unchanged_with(
            current,
            Effect::RetryLater { unit, reason },
        )),
    }
}

/// Mark the unit at the cursor completed.
fn advance(current: &ClusterRefresh) -> Transition {
    let cursor = current.cursor + 1;
    let len = current.planned_order.len();
    let mut next = ClusterRefresh {
        cursor,
        step_in_flight: None,
        last_error: None,
        ..current.clone()
    };

    if cursor >= len {
        next.phase = RefreshPhase::Completed;
        return Transition::persist(next);
    }

    if next.awaiting_confirmation() {
        next.phase = RefreshPhase::Paused;
        let unit = next.planned_order[cursor].clone();
        return Transition::persist(next).then(Effect::AwaitConfirmation { unit });
    }

    Transition::persist(next)
}

fn fail(current: &ClusterRefresh, reason: String) -> Transition {
    Transition::persist(ClusterRefresh {
        phase: RefreshPhase::Failed,
        step_in_flight: None,
        last_error: Some(reason.clone()),
        ..current.clone()
    })
    .then(Effect::Escalate { reason })
}

fn position(current: &ClusterRefresh, unit: &UnitId) -> Result<usize, TransitionError> {
    current
        .position_of(unit)
        .ok_or_else(|| TransitionError::UnknownUnit { unit: unit.clone() })
}

fn not_permitted(current: &ClusterRefresh, unit: UnitId) -> TransitionError {
    TransitionError::NotPermitted {
        unit,
        expected: current.permitted_unit().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str) -> UnitId {
        UnitId::parse(id).unwrap()
    }

    fn v1() -> VersionPair {
        VersionPair::new("14.9", "rev1")
    }

    fn v2() -> VersionPair {
        VersionPair::new("16.2", "rev2")
    }

    fn plan() -> Vec<UnitId> {
        vec![unit("db/0"), unit("db/1"), unit("db/2")]
    }

    fn step(current: &ClusterRefresh, event: RefreshEvent) -> ClusterRefresh {
        evaluate(current, event).unwrap().next
    }

    fn preflighted(policy: PausePolicy) -> ClusterRefresh {
        step(
            &ClusterRefresh::idle(),
            RefreshEvent::PreflightPassed {
                refresh_id: RefreshId::new(),
                original_version: v1(),
                planned_order: plan(),
                pause_policy: policy,
                leader: Some(unit("db/2")),
                rollback_command: Some("refresh db --revision=rev1".into()),
            },
        )
    }

    fn started(policy: PausePolicy) -> ClusterRefresh {
        step(
            &preflighted(policy),
            RefreshEvent::Start {
                target_version: v2(),
            },
        )
    }

    fn pass(current: &ClusterRefresh, id: &str) -> Transition {
        evaluate(
            current,
            RefreshEvent::Evaluate {
                unit: unit(id),
                verdict: GateVerdict::Pass,
                local_version: Some(v1()),
            },
        )
        .unwrap()
    }

    fn complete(current: &ClusterRefresh, id: &str) -> ClusterRefresh {
        let marked = pass(current, id).next;
        step(&marked, RefreshEvent::UnitCompleted { unit: unit(id) })
    }

    #[test]
    fn preflight_freezes_plan() {
        let refresh = preflighted(PausePolicy::None);
        assert_eq!(refresh.phase, RefreshPhase::PreflightPassed);
        assert_eq!(refresh.planned_order, plan());
        assert_eq!(refresh.original_version, Some(v1()));
        assert_eq!(refresh.target_version, None);
        assert_eq!(refresh.leader_at_planning, Some(unit("db/2")));
    }

    #[test]
    fn preflight_rejected_while_walking() {
        let err = evaluate(
            &started(PausePolicy::None),
            RefreshEvent::PreflightPassed {
                refresh_id: RefreshId::new(),
                original_version: v1(),
                planned_order: plan(),
                pause_policy: PausePolicy::None,
                leader: None,
                rollback_command: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn full_walk_without_pauses_completes() {
        let mut refresh = started(PausePolicy::None);
        assert_eq!(refresh.phase, RefreshPhase::InProgress);
        for id in ["db/0", "db/1", "db/2"] {
            refresh = complete(&refresh, id);
        }
        assert_eq!(refresh.phase, RefreshPhase::Completed);
        assert_eq!(refresh.cursor, 3);
        assert_eq!(refresh.step_in_flight, None);
    }

    #[test]
    fn pass_sets_marker_and_requests_switch() {
        let t = pass(&started(PausePolicy::None), "db/0");
        assert!(t.applied);
        assert_eq!(t.next.step_in_flight, Some(unit("db/0")));
        assert_eq!(
            t.effects,
            vec![
                Effect::Persist,
                Effect::SwitchWorkload {
                    unit: unit("db/0"),
                    target: v2()
                }
            ]
        );
        assert_eq!(t.switch_target(), Some(&v2()));
    }

    #[test]
    fn duplicate_completion_is_absorbed() {
        let once = complete(&started(PausePolicy::None), "db/0");
        let again = evaluate(&once, RefreshEvent::UnitCompleted { unit: unit("db/0") }).unwrap();
        assert!(!again.applied);
        assert_eq!(again.next.cursor, 1);
    }

    #[test]
    fn completion_from_a_later_unit_is_not_permitted() {
        let err = evaluate(
            &started(PausePolicy::None),
            RefreshEvent::UnitCompleted { unit: unit("db/1") },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::NotPermitted { .. }));
    }

    #[test]
    fn unit_already_on_target_is_verified_before_advancing() {
        let refresh = started(PausePolicy::None);
        let t = evaluate(
            &refresh,
            RefreshEvent::Evaluate {
                unit: unit("db/0"),
                verdict: GateVerdict::Pass,
                local_version: Some(v2()),
            },
        )
        .unwrap();
        assert!(!t.applied);
        assert_eq!(t.next.cursor, 0);
        assert_eq!(t.switch_target(), None);
        assert_eq!(
            t.effects,
            vec![Effect::VerifySwitch {
                unit: unit("db/0"),
                target: v2()
            }]
        );

        let done = step(&t.next, RefreshEvent::UnitCompleted { unit: unit("db/0") });
        assert_eq!(done.cursor, 1);
    }

    #[test]
    fn interrupted_unit_down_on_target_fails_instead_of_advancing() {
        let marked = pass(&started(PausePolicy::None), "db/0").next;
        let t = evaluate(
            &marked,
            RefreshEvent::Evaluate {
                unit: unit("db/0"),
                verdict: GateVerdict::Fail(GateFailure::UnitNotRunning { unit: unit("db/0") }),
                local_version: Some(v2()),
            },
        )
        .unwrap();
        assert_eq!(t.next.cursor, 0);
        assert!(matches!(t.effects.as_slice(), [Effect::VerifySwitch { .. }]));

        let failed = step(
            &t.next,
            RefreshEvent::SwitchFailed {
                unit: unit("db/0"),
                reason: "crash loop".into(),
            },
        );
        assert_eq!(failed.phase, RefreshPhase::Failed);
        assert_eq!(failed.cursor, 0);
        assert_eq!(failed.step_in_flight, None);
    }

    #[test]
    fn interrupted_step_is_reissued() {
        let marked = pass(&started(PausePolicy::None), "db/0").next;
        let t = evaluate(
            &marked,
            RefreshEvent::Evaluate {
                unit: unit("db/0"),
                verdict: GateVerdict::Fail(GateFailure::UnitNotRunning { unit: unit("db/0") }),
                local_version: Some(v1()),
            },
        )
        .unwrap();
        assert!(!t.applied);
        assert_eq!(t.switch_target(), Some(&v2()));
    }

    #[test]
    fn transient_gate_failure_retries_without_change() {
        let refresh = started(PausePolicy::None);
        let reason = GateFailure::ReplicationLagging {
            unit: unit("db/0"),
            lag_bytes: 10,
            bound_bytes: 1,
        };
        let t = evaluate(
            &refresh,
            RefreshEvent::Evaluate {
                unit: unit("db/0"),
                verdict: GateVerdict::Fail(reason.clone()),
                local_version: Some(v1()),
            },
        )
        .unwrap();
        assert_eq!(t.next, refresh);
        assert_eq!(
            t.effects,
            vec![Effect::RetryLater {
                unit: unit("db/0"),
                reason
            }]
        );
    }

    #[test]
    fn first_policy_pauses_once() {
        let refresh = complete(&started(PausePolicy::First), "db/0");
        assert_eq!(refresh.phase, RefreshPhase::Paused);
        assert_eq!(refresh.cursor, 1);

        let resumed = step(
            &refresh,
            RefreshEvent::Resume {
                unit_hint: unit("db/1"),
            },
        );
        assert_eq!(resumed.phase, RefreshPhase::InProgress);
        let after = complete(&resumed, "db/1");
        assert_eq!(after.phase, RefreshPhase::InProgress);
        assert_eq!(complete(&after, "db/2").phase, RefreshPhase::Completed);
    }

    #[test]
    fn all_policy_pauses_between_every_unit() {
        let mut refresh = started(PausePolicy::All);
        let mut pauses = 0;
        for id in ["db/0", "db/1", "db/2"] {
            if refresh.phase == RefreshPhase::Paused {
                pauses += 1;
                refresh = step(&refresh, RefreshEvent::Resume { unit_hint: unit(id) });
            }
            refresh = complete(&refresh, id);
        }
        assert_eq!(pauses, 2);
        assert_eq!(refresh.phase, RefreshPhase::Completed);
    }

    #[test]
    fn confirmation_gate_failure_pauses() {
        let t = evaluate(
            &started(PausePolicy::None),
            RefreshEvent::Evaluate {
                unit: unit("db/0"),
                verdict: GateVerdict::Fail(GateFailure::AwaitingConfirmation { unit: unit("db/0") }),
                local_version: Some(v1()),
            },
        )
        .unwrap();
        assert_eq!(t.next.phase, RefreshPhase::Paused);
        assert!(t.effects.contains(&Effect::AwaitConfirmation { unit: unit("db/0") }));
    }

    #[test]
    fn resume_hint_rules() {
        let paused = complete(&started(PausePolicy::First), "db/0");

        let stale = evaluate(&paused, RefreshEvent::Resume { unit_hint: unit("db/0") }).unwrap();
        assert!(!stale.applied);
        assert_eq!(stale.next.phase, RefreshPhase::Paused);

        let early = evaluate(&paused, RefreshEvent::Resume { unit_hint: unit("db/2") });
        assert!(matches!(
            early,
            Err(TransitionError::UnexpectedUnitHint { .. })
        ));

        let unknown = evaluate(&paused, RefreshEvent::Resume { unit_hint: unit("db/9") });
        assert!(matches!(unknown, Err(TransitionError::UnknownUnit { .. })));

        let resumed = step(&paused, RefreshEvent::Resume { unit_hint: unit("db/1") });
        let duplicate = evaluate(&resumed, RefreshEvent::Resume { unit_hint: unit("db/1") }).unwrap();
        assert!(!duplicate.applied);
    }

    #[test]
    fn switch_failure_freezes_cursor() {
        let refresh = complete(&started(PausePolicy::None), "db/0");
        let marked = pass(&refresh, "db/1").next;
        let t = evaluate(
            &marked,
            RefreshEvent::SwitchFailed {
                unit: unit("db/1"),
                reason: "probe timed out".into(),
            },
        )
        .unwrap();
        assert_eq!(t.next.phase, RefreshPhase::Failed);
        assert_eq!(t.next.cursor, 1);
        assert_eq!(t.next.step_in_flight, None);
        assert!(t.next.last_error.as_deref().unwrap().contains("db/1"));
        assert!(matches!(t.effects.last(), Some(Effect::Escalate { .. })));
    }

    #[test]
    fn abort_rejected_mid_step() {
        let marked = pass(&started(PausePolicy::None), "db/0").next;
        let err = evaluate(
            &marked,
            RefreshEvent::Abort {
                rollback_order: plan(),
            },
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::StepInFlight { unit: unit("db/0") });
    }

    #[test]
    fn abort_replans_rollback_walk() {
        let refresh = complete(&started(PausePolicy::None), "db/0");
        let rolled = step(
            &refresh,
            RefreshEvent::Abort {
                rollback_order: plan(),
            },
        );
        assert_eq!(rolled.phase, RefreshPhase::RolledBack);
        assert_eq!(rolled.cursor, 0);
        assert_eq!(rolled.rollback_of, Some(v2()));
        assert_eq!(rolled.active_target(), Some(&v1()));

        // Units on the rolled-back version are switched; units still on the
        // original version are only verified.
        let t = evaluate(
            &rolled,
            RefreshEvent::Evaluate {
                unit: unit("db/0"),
                verdict: GateVerdict::Pass,
                local_version: Some(v2()),
            },
        )
        .unwrap();
        assert_eq!(t.switch_target(), Some(&v1()));

        let mut walk = rolled;
        for id in ["db/0", "db/1", "db/2"] {
            let t = evaluate(
                &walk,
                RefreshEvent::Evaluate {
                    unit: unit(id),
                    verdict: GateVerdict::Pass,
                    local_version: Some(v1()),
                },
            )
            .unwrap();
            assert_eq!(t.switch_target(), None);
            walk = step(&t.next, RefreshEvent::UnitCompleted { unit: unit(id) });
        }
        assert_eq!(walk.phase, RefreshPhase::Completed);
        assert_eq!(walk.rollback_of, Some(v2()));
    }

    #[test]
    fn abort_accepted_after_failure() {
        let marked = pass(&started(PausePolicy::None), "db/0").next;
        let failed = step(
            &marked,
            RefreshEvent::SwitchFailed {
                unit: unit("db/0"),
                reason: "crash loop".into(),
            },
        );
        let rolled = step(
            &failed,
            RefreshEvent::Abort {
                rollback_order: plan(),
            },
        );
        assert_eq!(rolled.phase, RefreshPhase::RolledBack);
        assert_eq!(rolled.last_error, None);
    }

    #[test]
    fn start_is_idempotent_and_guards_target() {
        let refresh = started(PausePolicy::None);
        let again = evaluate(
            &refresh,
            RefreshEvent::Start {
                target_version: v2(),
            },
        )
        .unwrap();
        assert!(!again.applied);

        let other = evaluate(
            &refresh,
            RefreshEvent::Start {
                target_version: VersionPair::new("17.0", "rev3"),
            },
        );
        assert!(matches!(other, Err(TransitionError::TargetMismatch { .. })));

        let same = evaluate(
            &preflighted(PausePolicy::None),
            RefreshEvent::Start {
                target_version: v1(),
            },
        );
        assert!(matches!(same, Err(TransitionError::SameVersion { .. })));

        let idle = evaluate(
            &ClusterRefresh::idle(),
            RefreshEvent::Start {
                target_version: v2(),
            },
        );
        assert!(matches!(
            idle,
            Err(TransitionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn acknowledge_resets_to_idle() {
        let mut refresh = started(PausePolicy::None);
        for id in ["db/0", "db/1", "db/2"] {
            refresh = complete(&refresh, id);
        }
        let idle = step(&refresh, RefreshEvent::Acknowledge);
        assert_eq!(idle, ClusterRefresh::idle());

        let again = evaluate(&idle, RefreshEvent::Acknowledge).unwrap();
        assert!(!again.applied);

        let err = evaluate(&started(PausePolicy::None), RefreshEvent::Acknowledge);
        assert!(err.is_err());
    }

    #[test]
    fn observers_are_ignored_outside_walks() {
        let paused = complete(&started(PausePolicy::First), "db/0");
        let observer = evaluate(
            &paused,
            RefreshEvent::Evaluate {
                unit: unit("db/2"),
                verdict: GateVerdict::Pass,
                local_version: Some(v1()),
            },
        )
        .unwrap();
        assert!(observer.effects.is_empty());

        let waiting = evaluate(
            &paused,
            RefreshEvent::Evaluate {
                unit: unit("db/1"),
                verdict: GateVerdict::Pass,
                local_version: Some(v1()),
            },
        )
        .unwrap();
        assert_eq!(
            waiting.effects,
            vec![Effect::AwaitConfirmation { unit: unit("db/1") }]
        );
    }
}
