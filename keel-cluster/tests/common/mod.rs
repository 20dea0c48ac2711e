//! Common test utilities for keel-cluster tests.

use keel_core::{ClusterRefresh, PausePolicy, RefreshId, RefreshPhase, UnitId, VersionPair};

/// A preflight-passed record over `units`.
#[allow(dead_code)]
pub fn preflighted(units: &[&str]) -> ClusterRefresh {
    ClusterRefresh {
        id: Some(RefreshId::new()),
        original_version: Some(VersionPair::new("14.9", "rev1")),
        phase: RefreshPhase::PreflightPassed,
        pause_policy: PausePolicy::First,
        planned_order: units.iter().map(|u| UnitId::parse(*u).unwrap()).collect(),
        ..ClusterRefresh::idle()
    }
}

/// The same record moved to in-progress towards a new version.
#[allow(dead_code)]
pub fn started(refresh: &ClusterRefresh) -> ClusterRefresh {
    ClusterRefresh {
        phase: RefreshPhase::InProgress,
        target_version: Some(VersionPair::new("16.2", "rev2")),
        ..refresh.clone()
    }
}
