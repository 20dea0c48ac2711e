//! Read-only snapshot of cluster membership and roles.
//!
//! A [`TopologyView`] is built from the HA coordinator's status surface on
//! every evaluation. It is never cached across lifecycle signals: roles can
//! change at any moment through failover.

use serde::{Deserialize, Serialize};

use crate::types::{Role, UnitId};

/// Status of one unit as reported by the HA coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatus {
    /// Unit identifier.
    pub unit_id: UnitId,
    /// Current cluster role.
    pub role: Role,
    /// Whether the database process reports itself running.
    pub healthy: bool,
    /// Replication lag behind the leader in bytes (0 for the leader).
    pub replication_lag_bytes: u64,
}

impl UnitStatus {
    /// Create a healthy, caught-up unit status.
    pub fn new(unit_id: UnitId, role: Role) -> Self {
        Self {
            unit_id,
            role,
            healthy: true,
            replication_lag_bytes: 0,
        }
    }

    /// Mark the unit as not running.
    #[must_use]
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Set the replication lag.
    #[must_use]
    pub fn with_lag(mut self, bytes: u64) -> Self {
        self.replication_lag_bytes = bytes;
        self
    }
}

/// Snapshot of the cluster's membership, sorted by unit ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyView {
    members: Vec<UnitStatus>,
}

impl TopologyView {
    /// Build a view from member statuses. Later duplicates of a unit ID
    /// replace earlier ones.
    pub fn new(members: impl IntoIterator<Item = UnitStatus>) -> Self {
        let mut deduped: Vec<UnitStatus> = Vec::new();
        for member in members {
            match deduped.iter_mut().find(|m| m.unit_id == member.unit_id) {
                Some(existing) => *existing = member,
                None => deduped.push(member),
            }
        }
        deduped.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        Self { members: deduped }
    }

    /// All members, ascending by unit ID.
    pub fn members(&self) -> &[UnitStatus] {
        &self.members
    }

    /// Look up a unit.
    pub fn get(&self, unit: &UnitId) -> Option<&UnitStatus> {
        self.members.iter().find(|m| &m.unit_id == unit)
    }

    /// Number of units in the cluster.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the view has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// All units currently holding the leader role.
    pub fn leaders(&self) -> impl Iterator<Item = &UnitStatus> {
        self.members.iter().filter(|m| m.role == Role::Leader)
    }

    /// The leader, if exactly one unit holds the role.
    pub fn leader(&self) -> Option<&UnitId> {
        let mut leaders = self.leaders();
        match (leaders.next(), leaders.next()) {
            (Some(leader), None) => Some(&leader.unit_id),
            _ => None,
        }
    }

    /// Units holding `role`, ascending by unit ID.
    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &UnitId> {
        self.members
            .iter()
            .filter(move |m| m.role == role)
            .map(|m| &m.unit_id)
    }

    /// Number of units whose database process is running.
    pub fn healthy_count(&self) -> usize {
        self.members.iter().filter(|m| m.healthy).count()
    }

    /// Votes needed to elect a leader.
    pub fn majority(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// Additional unit losses the cluster can tolerate while still electing
    /// a leader. Negative when the cluster has already lost quorum.
    pub fn quorum_margin(&self) -> i64 {
        self.healthy_count() as i64 - self.majority() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(unit: &str, role: Role) -> UnitStatus {
        UnitStatus::new(UnitId::parse(unit).unwrap(), role)
    }

    #[test]
    fn view_sorts_and_dedups() {
        let view = TopologyView::new([
            status("db/2", Role::Leader),
            status("db/0", Role::Replica),
            status("db/2", Role::SyncStandby),
        ]);
        assert_eq!(view.len(), 2);
        assert_eq!(view.members()[0].unit_id.as_str(), "db/0");
        assert_eq!(view.members()[1].role, Role::SyncStandby);
        assert_eq!(view.leader(), None);
    }

    #[test]
    fn leader_requires_exactly_one() {
        let view = TopologyView::new([status("db/0", Role::Leader), status("db/1", Role::Leader)]);
        assert_eq!(view.leaders().count(), 2);
        assert_eq!(view.leader(), None);
    }

    #[test]
    fn quorum_margin_counts_healthy_units() {
        let three = TopologyView::new([
            status("db/0", Role::Replica),
            status("db/1", Role::SyncStandby),
            status("db/2", Role::Leader),
        ]);
        assert_eq!(three.majority(), 2);
        assert_eq!(three.quorum_margin(), 1);

        let degraded = TopologyView::new([
            status("db/0", Role::Replica).unhealthy(),
            status("db/1", Role::SyncStandby),
            status("db/2", Role::Leader),
        ]);
        assert_eq!(degraded.quorum_margin(), 0);

        let two = TopologyView::new([status("db/0", Role::Replica), status("db/1", Role::Leader)]);
        assert_eq!(two.quorum_margin(), 0);
    }
}
