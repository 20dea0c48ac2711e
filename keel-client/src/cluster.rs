//! Cluster topology queries.

use keel_core::{Role, TopologyView, UnitId, UnitStatus};

use crate::client::Client;
use crate::error::{ClientError, Result};
use crate::types::{ClusterInfo, Lag, MemberInfo};

impl Client {
    /// Raw member list from `GET /cluster`.
    pub async fn cluster_info(&self) -> Result<ClusterInfo> {
        let response = self.get("cluster").await?;
        self.handle_response(response).await
    }

    /// Current topology as reported by the coordinator.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success status codes, and member names
    /// that do not map to unit identifiers.
    pub async fn cluster_status(&self) -> Result<TopologyView> {
        let info = self.cluster_info().await?;
        let members = info
            .members
            .iter()
            .map(member_status)
            .collect::<Result<Vec<_>>>()?;
        Ok(TopologyView::new(members))
    }
}

/// Map one coordinator member to a unit status.
pub fn member_status(member: &MemberInfo) -> Result<UnitStatus> {
    let unit_id = UnitId::from_member_name(&member.name)
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

    let role = match member.role.as_str() {
        "leader" | "standby_leader" => Role::Leader,
        "sync_standby" => Role::SyncStandby,
        _ => Role::Replica,
    };

    let healthy = matches!(member.state.as_str(), "running" | "streaming");

    let replication_lag_bytes = match (&member.lag, role) {
        (Some(Lag::Bytes(bytes)), _) => *bytes,
        (_, Role::Leader) => 0,
        (Some(Lag::Other(_)) | None, _) => u64::MAX,
    };

    Ok(UnitStatus {
        unit_id,
        role,
        healthy,
        replication_lag_bytes,
    })
}
