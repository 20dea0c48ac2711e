//! Role-aware ordering of units for a rolling refresh.
//!
//! Followers refresh before the leader: every replica (ascending unit ID),
//! then every synchronous standby (ascending unit ID), then the leader. The
//! plan is computed once when a walk starts and is never recomputed while it
//! runs, so a transient role change cannot make the order oscillate.

use crate::refresh::ClusterRefresh;
use crate::topology::TopologyView;
use crate::types::UnitId;

/// Computes refresh plans and answers which unit may act next.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitSequencer;

impl UnitSequencer {
    /// Create a sequencer.
    pub fn new() -> Self {
        Self
    }

    /// Plan the upgrade walk for the given topology.
    pub fn plan(&self, view: &TopologyView) -> Vec<UnitId> {
        let mut members: Vec<_> = view.members().iter().collect();
        // Stable sort keeps the ascending unit ID order within a role.
        members.sort_by_key(|m| m.role.refresh_rank());
        members.into_iter().map(|m| m.unit_id.clone()).collect()
    }

    /// Plan a rollback walk.
    ///
    /// The rollback is derived fresh from the topology observed when it
    /// starts, with the same role rule as an upgrade; it is not the upgrade
    /// plan reversed.
    pub fn plan_rollback(&self, view: &TopologyView) -> Vec<UnitId> {
        self.plan(view)
    }

    /// The next unit allowed to refresh, if the record is walking its plan.
    ///
    /// Only the frozen plan and cursor decide this; the live topology is not
    /// consulted. A role change after planning is reported by
    /// [`leader_drift`](Self::leader_drift) instead of reordering the walk.
    pub fn next_eligible(&self, refresh: &ClusterRefresh) -> Option<UnitId> {
        refresh.permitted_unit().cloned()
    }

    /// The planning-time leader and the current one, when they differ.
    pub fn leader_drift<'a>(
        &self,
        refresh: &'a ClusterRefresh,
        view: &'a TopologyView,
    ) -> Option<(&'a UnitId, &'a UnitId)> {
        match (refresh.leader_at_planning.as_ref(), view.leader()) {
            (Some(was), Some(now)) if was != now => Some((was, now)),
            _ => None,
        }
    }

    /// Whether `unit` is the unit allowed to act on `refresh` right now.
    pub fn is_permitted(&self, refresh: &ClusterRefresh, unit: &UnitId) -> bool {
        refresh.permitted_unit() == Some(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::RefreshPhase;
    use crate::topology::UnitStatus;
    use crate::types::Role;

    fn status(unit: &str, role: Role) -> UnitStatus {
        UnitStatus::new(UnitId::parse(unit).unwrap(), role)
    }

    fn ids(plan: &[UnitId]) -> Vec<&str> {
        plan.iter().map(UnitId::as_str).collect()
    }

    #[test]
    fn leader_is_planned_last() {
        let view = TopologyView::new([
            status("db/0", Role::Leader),
            status("db/1", Role::SyncStandby),
            status("db/2", Role::Replica),
        ]);
        let plan = UnitSequencer::new().plan(&view);
        assert_eq!(ids(&plan), ["db/2", "db/1", "db/0"]);
    }

    #[test]
    fn roles_group_then_sort_by_unit_number() {
        let view = TopologyView::new([
            status("db/11", Role::Replica),
            status("db/3", Role::SyncStandby),
            status("db/4", Role::Leader),
            status("db/2", Role::Replica),
            status("db/1", Role::SyncStandby),
        ]);
        let plan = UnitSequencer::new().plan(&view);
        assert_eq!(ids(&plan), ["db/2", "db/11", "db/1", "db/3", "db/4"]);
    }

    #[test]
    fn every_topology_puts_the_leader_last() {
        let roles = [Role::Replica, Role::SyncStandby, Role::Leader];
        // Exhaust leader placement over a five unit cluster with mixed roles.
        for leader in 0..5 {
            let members = (0..5).map(|i| {
                let role = if i == leader { Role::Leader } else { roles[i % 2] };
                status(&format!("db/{i}"), role)
            });
            let view = TopologyView::new(members);
            let plan = UnitSequencer::new().plan(&view);
            assert_eq!(plan.last(), view.leader());
            assert_eq!(plan.len(), 5);
        }
    }

    #[test]
    fn rollback_uses_the_same_role_rule() {
        let view = TopologyView::new([
            status("db/0", Role::Replica),
            status("db/1", Role::Leader),
            status("db/2", Role::SyncStandby),
        ]);
        let sequencer = UnitSequencer::new();
        assert_eq!(sequencer.plan_rollback(&view), sequencer.plan(&view));
        assert_eq!(ids(&sequencer.plan_rollback(&view)), ["db/0", "db/2", "db/1"]);
    }

    #[test]
    fn next_eligible_follows_cursor() {
        let view = TopologyView::new([
            status("db/0", Role::Replica),
            status("db/1", Role::Leader),
        ]);
        let sequencer = UnitSequencer::new();
        let mut refresh = ClusterRefresh {
            planned_order: sequencer.plan(&view),
            phase: RefreshPhase::InProgress,
            ..ClusterRefresh::idle()
        };
        let first = UnitId::parse("db/0").unwrap();
        assert_eq!(sequencer.next_eligible(&refresh), Some(first.clone()));
        assert!(sequencer.is_permitted(&refresh, &first));

        refresh.cursor = 2;
        assert_eq!(sequencer.next_eligible(&refresh), None);

        refresh.cursor = 0;
        refresh.phase = RefreshPhase::PreflightPassed;
        assert_eq!(sequencer.next_eligible(&refresh), None);
    }

    #[test]
    fn failover_is_reported_without_replanning() {
        let planned = TopologyView::new([
            status("db/0", Role::Replica),
            status("db/1", Role::Replica),
            status("db/2", Role::Leader),
        ]);
        let sequencer = UnitSequencer::new();
        let refresh = ClusterRefresh {
            planned_order: sequencer.plan(&planned),
            leader_at_planning: planned.leader().cloned(),
            phase: RefreshPhase::InProgress,
            ..ClusterRefresh::idle()
        };
        assert_eq!(sequencer.leader_drift(&refresh, &planned), None);

        let failed_over = TopologyView::new([
            status("db/0", Role::Leader),
            status("db/1", Role::Replica),
            status("db/2", Role::Replica),
        ]);
        let (was, now) = sequencer.leader_drift(&refresh, &failed_over).unwrap();
        assert_eq!((was.as_str(), now.as_str()), ("db/2", "db/0"));
        assert_eq!(
            sequencer.next_eligible(&refresh),
            Some(UnitId::parse("db/0").unwrap())
        );
    }
}
