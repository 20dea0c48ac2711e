//! The peer-communication channel abstraction.

use async_trait::async_trait;
use chrono::Utc;
use keel_core::record::validate;
use keel_core::{ClusterRefresh, VersionedRefresh};
use tokio::sync::broadcast;

use crate::error::{ClusterError, ClusterResult};

/// Subscription to stamps of applied writes.
pub type StampWatch = broadcast::Receiver<u64>;

/// Outcome of a compare-and-swap write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed with this stamp.
    Applied {
        /// Stamp of the new record.
        stamp: u64,
    },
    /// The stored stamp moved since the caller read it.
    Conflict {
        /// The record as currently stored.
        current: VersionedRefresh,
    },
}

impl CasOutcome {
    /// Whether the write landed.
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied { .. })
    }
}

/// Shared, eventually consistent storage for the refresh record.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Read the current record. An empty store reads as idle at stamp 0.
    async fn load(&self) -> ClusterResult<VersionedRefresh>;

    /// Replace the record if its stamp still equals `expected_stamp`.
    async fn compare_and_swap(
        &self,
        expected_stamp: u64,
        refresh: &ClusterRefresh,
    ) -> ClusterResult<CasOutcome>;

    /// Subscribe to applied writes, if the backend can notify.
    fn watch(&self) -> Option<StampWatch>;
}

/// Decide a compare-and-swap against the stored record.
pub(crate) enum WritePlan {
    Write(VersionedRefresh),
    Conflict(VersionedRefresh),
}

pub(crate) fn plan_write(
    stored: VersionedRefresh,
    expected_stamp: u64,
    refresh: &ClusterRefresh,
) -> ClusterResult<WritePlan> {
    if stored.stamp != expected_stamp {
        tracing::debug!(
            expected = expected_stamp,
            actual = stored.stamp,
            "refresh record moved; write lost"
        );
        return Ok(WritePlan::Conflict(stored));
    }
    validate(refresh).map_err(ClusterError::InvalidWrite)?;
    Ok(WritePlan::Write(stored.successor(refresh.clone(), Utc::now())))
}
