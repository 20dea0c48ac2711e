//! Wire types of the coordinator's `/cluster` endpoint.

use serde::{Deserialize, Serialize};

/// Body of `GET /cluster`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Members known to the coordinator.
    #[serde(default)]
    pub members: Vec<MemberInfo>,
}

/// One member as the coordinator reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Member name, `<application>-<number>`.
    pub name: String,
    /// Coordinator role (`leader`, `standby_leader`, `sync_standby`, `replica`).
    pub role: String,
    /// Database state (`running`, `streaming`, `stopped`, ...).
    #[serde(default)]
    pub state: String,
    /// Replication lag in bytes, or `"unknown"`.
    #[serde(default)]
    pub lag: Option<Lag>,
    /// Host the member listens on.
    #[serde(default)]
    pub host: Option<String>,
    /// Current timeline.
    #[serde(default)]
    pub timeline: Option<u64>,
}

/// Lag as reported: a byte count or a marker string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lag {
    /// Bytes behind the leader.
    Bytes(u64),
    /// Lag the coordinator could not determine.
    Other(String),
}
