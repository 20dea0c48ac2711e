//! In-process peer channel.
//!
//! Clones share one flat key/value map, so a set of simulated units can run
//! against the same record in a single process.

use async_trait::async_trait;
use keel_core::{ClusterRefresh, VersionedRefresh};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::channel::{CasOutcome, PeerChannel, StampWatch, WritePlan, plan_write};
use crate::error::ClusterResult;

/// Peer channel backed by shared memory.
#[derive(Clone)]
pub struct MemoryPeerChannel {
    store: Arc<Mutex<BTreeMap<String, String>>>,
    changes: broadcast::Sender<u64>,
}

impl MemoryPeerChannel {
    /// Create an empty channel.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            store: Arc::new(Mutex::new(BTreeMap::new())),
            changes,
        }
    }

    /// Raw flat map, as peers would see it.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.store.lock().clone()
    }
}

impl Default for MemoryPeerChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerChannel for MemoryPeerChannel {
    async fn load(&self) -> ClusterResult<VersionedRefresh> {
        let store = self.store.lock();
        Ok(VersionedRefresh::decode(&store)?)
    }

    async fn compare_and_swap(
        &self,
        expected_stamp: u64,
        refresh: &ClusterRefresh,
    ) -> ClusterResult<CasOutcome> {
        let stamp = {
            let mut store = self.store.lock();
            let stored = VersionedRefresh::decode(&store)?;
            match plan_write(stored, expected_stamp, refresh)? {
                WritePlan::Conflict(current) => return Ok(CasOutcome::Conflict { current }),
                WritePlan::Write(next) => {
                    *store = next.encode();
                    next.stamp
                }
            }
        };

        // No receivers is fine.
        let _ = self.changes.send(stamp);
        Ok(CasOutcome::Applied { stamp })
    }

    fn watch(&self) -> Option<StampWatch> {
        Some(self.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{PausePolicy, RefreshId, RefreshPhase, UnitId, VersionPair};

    fn preflighted() -> ClusterRefresh {
        ClusterRefresh {
            id: Some(RefreshId::new()),
            original_version: Some(VersionPair::new("14.9", "rev1")),
            phase: RefreshPhase::PreflightPassed,
            pause_policy: PausePolicy::None,
            planned_order: vec![UnitId::parse("db/0").unwrap()],
            ..ClusterRefresh::idle()
        }
    }

    #[tokio::test]
    async fn empty_channel_loads_idle() {
        let channel = MemoryPeerChannel::new();
        let record = channel.load().await.unwrap();
        assert_eq!(record.stamp, 0);
        assert_eq!(record.refresh.phase, RefreshPhase::Idle);
    }

    #[tokio::test]
    async fn stale_writer_gets_conflict() {
        let channel = MemoryPeerChannel::new();
        let first = channel.compare_and_swap(0, &preflighted()).await.unwrap();
        assert_eq!(first, CasOutcome::Applied { stamp: 1 });

        let second = channel.compare_and_swap(0, &ClusterRefresh::idle()).await.unwrap();
        let CasOutcome::Conflict { current } = second else {
            panic!("expected conflict");
        };
        assert_eq!(current.stamp, 1);
        assert_eq!(current.refresh.phase, RefreshPhase::PreflightPassed);
    }

    #[tokio::test]
    async fn clones_share_state_and_notify() {
        let a = MemoryPeerChannel::new();
        let b = a.clone();
        let mut watch = b.watch().unwrap();

        a.compare_and_swap(0, &preflighted()).await.unwrap();
        assert_eq!(watch.recv().await.unwrap(), 1);
        assert_eq!(b.load().await.unwrap().stamp, 1);
        assert_eq!(b.snapshot()["refresh.phase"], "preflight-passed");
    }

    #[tokio::test]
    async fn inconsistent_write_is_refused() {
        let channel = MemoryPeerChannel::new();
        let broken = ClusterRefresh {
            cursor: 5,
            ..preflighted()
        };
        assert!(channel.compare_and_swap(0, &broken).await.is_err());
        assert_eq!(channel.load().await.unwrap().stamp, 0);
    }
}
