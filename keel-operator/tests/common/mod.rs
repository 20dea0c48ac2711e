//! Simulated cluster for refresh controller tests.
//!
//! Every unit gets its own controller and gateway over one shared
//! [`MemoryPeerChannel`]. Topology, workloads and operations are scripted
//! fakes that tests can change between signals.

#![allow(dead_code)]

use async_trait::async_trait;
use keel_cluster::{MemoryPeerChannel, PeerChannel};
use keel_core::{
    ClusterRefresh, OperationKind, OperationsInFlight, PausePolicy, Role,
    TopologyView, UnitId, UnitStatus, VersionPair,
};
use keel_operator::{
    ActionGateway, AgentConfig, ControllerContext, LifecycleSignal, OperationMonitor,
    OperatorResult, ReconcileAction, RefreshController, TopologyProvider, WorkloadError,
    WorkloadManager,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn unit(id: &str) -> UnitId {
    UnitId::parse(id).unwrap()
}

pub fn v1() -> VersionPair {
    VersionPair::new("14.9", "rev1")
}

pub fn v2() -> VersionPair {
    VersionPair::new("16.2", "rev2")
}

/// Topology the coordinator reports; tests mutate it in place.
#[derive(Default)]
pub struct ScriptedTopology {
    members: Mutex<BTreeMap<UnitId, UnitStatus>>,
}

impl ScriptedTopology {
    pub fn set(&self, status: UnitStatus) {
        self.members.lock().insert(status.unit_id.clone(), status);
    }

    pub fn set_role(&self, id: &UnitId, role: Role) {
        if let Some(m) = self.members.lock().get_mut(id) {
            m.role = role;
        }
    }

    pub fn view(&self) -> TopologyView {
        TopologyView::new(self.members.lock().values().cloned())
    }
}

#[async_trait]
impl TopologyProvider for ScriptedTopology {
    async fn topology(&self) -> OperatorResult<TopologyView> {
        Ok(self.view())
    }
}

/// One unit's workload.
pub struct ScriptedWorkload {
    version: Mutex<VersionPair>,
    /// Probe failure, optionally limited to one version.
    fail_probe: Mutex<Option<(Option<VersionPair>, String)>>,
    switches: AtomicUsize,
}

impl ScriptedWorkload {
    pub fn new(version: VersionPair) -> Self {
        Self {
            version: Mutex::new(version),
            fail_probe: Mutex::new(None),
            switches: AtomicUsize::new(0),
        }
    }

    pub fn version(&self) -> VersionPair {
        self.version.lock().clone()
    }

    pub fn fail_probe(&self, reason: &str) {
        *self.fail_probe.lock() = Some((None, reason.to_string()));
    }

    /// Fail the probe only while the workload runs `version`.
    pub fn fail_probe_on(&self, version: VersionPair, reason: &str) {
        *self.fail_probe.lock() = Some((Some(version), reason.to_string()));
    }

    pub fn heal_probe(&self) {
        *self.fail_probe.lock() = None;
    }

    pub fn set_version(&self, version: VersionPair) {
        *self.version.lock() = version;
    }

    pub fn switches(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadManager for ScriptedWorkload {
    async fn local_version(&self) -> Result<VersionPair, WorkloadError> {
        Ok(self.version())
    }

    async fn switch_version(&self, target: &VersionPair) -> Result<(), WorkloadError> {
        self.switches.fetch_add(1, Ordering::SeqCst);
        *self.version.lock() = target.clone();
        Ok(())
    }

    async fn probe(&self) -> Result<(), WorkloadError> {
        let failing = self.fail_probe.lock().clone();
        match failing {
            Some((only, stderr)) if only.as_ref().is_none_or(|v| *v == self.version()) => Err(WorkloadError::CommandFailed {
                command: "pg_isready".into(),
                status: "exit status: 2".into(),
                stderr,
            }),
            _ => Ok(()),
        }
    }
}

/// Destructive operations in flight.
#[derive(Default)]
pub struct ScriptedOperations {
    ops: Mutex<OperationsInFlight>,
}

impl ScriptedOperations {
    pub fn start(&self, kind: OperationKind) {
        self.ops.lock().insert(kind);
    }

    pub fn clear(&self) {
        *self.ops.lock() = OperationsInFlight::none();
    }
}

#[async_trait]
impl OperationMonitor for ScriptedOperations {
    async fn operations_in_flight(&self) -> OperatorResult<OperationsInFlight> {
        Ok(self.ops.lock().clone())
    }
}

pub struct SimUnit {
    pub id: UnitId,
    pub controller: RefreshController,
    pub gateway: ActionGateway,
    pub workload: Arc<ScriptedWorkload>,
    pub ctx: Arc<ControllerContext>,
}

pub struct SimCluster {
    pub channel: MemoryPeerChannel,
    pub topology: Arc<ScriptedTopology>,
    pub operations: Arc<ScriptedOperations>,
    pub units: Vec<SimUnit>,
}

impl SimCluster {
    /// Units `db/0..` with the given roles, all healthy and on `v1`.
    pub fn new(roles: &[Role], policy: PausePolicy) -> Self {
        let channel = MemoryPeerChannel::new();
        let topology = Arc::new(ScriptedTopology::default());
        let operations = Arc::new(ScriptedOperations::default());

        let units = roles
            .iter()
            .enumerate()
            .map(|(i, role)| {
                let id = unit(&format!("db/{i}"));
                topology.set(UnitStatus::new(id.clone(), *role));
                let workload = Arc::new(ScriptedWorkload::new(v1()));
                let config = AgentConfig::builder()
                    .unit(id.clone())
                    .application("db")
                    .pause_policy(policy)
                    .build()
                    .unwrap();
                let ctx = Arc::new(
                    ControllerContext::new(
                        config,
                        Arc::new(channel.clone()),
                        topology.clone(),
                        workload.clone(),
                        operations.clone(),
                    )
                    .unwrap(),
                );
                SimUnit {
                    id,
                    controller: RefreshController::new(ctx.clone()),
                    gateway: ActionGateway::new(ctx.clone()),
                    workload,
                    ctx,
                }
            })
            .collect();

        Self {
            channel,
            topology,
            operations,
            units,
        }
    }

    /// The usual three-unit cluster, listed leader first so the plan has to
    /// reorder it.
    pub fn three(policy: PausePolicy) -> Self {
        Self::new(&[Role::Leader, Role::Replica, Role::SyncStandby], policy)
    }

    pub fn unit(&self, id: &str) -> &SimUnit {
        let id = unit(id);
        self.units
            .iter()
            .find(|u| u.id == id)
            .unwrap_or_else(|| panic!("no unit {id}"))
    }

    pub async fn refresh(&self) -> ClusterRefresh {
        self.channel.load().await.unwrap().refresh
    }

    pub async fn signal(&self, id: &str, signal: LifecycleSignal) -> ReconcileAction {
        self.unit(id).controller.handle(&signal).await.unwrap()
    }

    /// Announce `v2` to every unit, as the platform does.
    pub async fn announce(&self) {
        for u in &self.units {
            u.controller
                .handle(&LifecycleSignal::RefreshAvailable {
                    target_version: v2(),
                })
                .await
                .unwrap();
        }
    }

    /// Deliver `peer-changed` to every unit until the record stops moving.
    pub async fn settle(&self) -> ClusterRefresh {
        let mut last = self.refresh().await;
        for _ in 0..50 {
            for u in &self.units {
                u.controller.handle(&LifecycleSignal::PeerChanged).await.unwrap();
            }
            let now = self.refresh().await;
            if now == last {
                return now;
            }
            last = now;
        }
        panic!("refresh did not settle: {last:?}");
    }

    pub fn switched(&self) -> Vec<usize> {
        self.units.iter().map(|u| u.workload.switches()).collect()
    }
}
