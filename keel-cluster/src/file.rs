//! File-backed peer channel.
//!
//! The flat map is stored as one JSON document on storage visible to every
//! unit. Writes go to a temporary file and are renamed over the document, so
//! readers never see a torn record. Compare-and-swap is serialized across
//! processes by an advisory exclusive lock on a file next to the document;
//! the lock dies with its holder.

use async_trait::async_trait;
use fs2::FileExt;
use keel_core::{ClusterRefresh, VersionedRefresh};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::channel::{CasOutcome, PeerChannel, StampWatch, WritePlan, plan_write};
use crate::error::{ClusterError, ClusterResult};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default time to wait for another writer's lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer channel persisted to a JSON file.
#[derive(Debug, Clone)]
pub struct FilePeerChannel {
    path: PathBuf,
    lock_timeout: Duration,
}

impl FilePeerChannel {
    /// Create a channel over the document at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set how long a writer waits for the lock.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Path of the document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    async fn read_map(&self) -> ClusterResult<BTreeMap<String, String>> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_map(&self, map: &BTreeMap<String, String>) -> ClusterResult<()> {
        let temp_path = self.sibling(".tmp");
        let data = serde_json::to_vec_pretty(map)?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(&data).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    async fn lock(&self) -> ClusterResult<LockGuard> {
        let path = self.sibling(".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .await?
            .into_std()
            .await;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(LockGuard { file }),
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    let waited = started.elapsed();
                    if waited >= self.lock_timeout {
                        return Err(ClusterError::LockTimeout { path, waited });
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Releases the store lock when dropped.
struct LockGuard {
    file: std::fs::File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[async_trait]
impl PeerChannel for FilePeerChannel {
    async fn load(&self) -> ClusterResult<VersionedRefresh> {
        let map = self.read_map().await?;
        Ok(VersionedRefresh::decode(&map)?)
    }

    async fn compare_and_swap(
        &self,
        expected_stamp: u64,
        refresh: &ClusterRefresh,
    ) -> ClusterResult<CasOutcome> {
        let _guard = self.lock().await?;
        let stored = VersionedRefresh::decode(&self.read_map().await?)?;

        match plan_write(stored, expected_stamp, refresh)? {
            WritePlan::Conflict(current) => Ok(CasOutcome::Conflict { current }),
            WritePlan::Write(next) => {
                self.write_map(&next.encode()).await?;
                tracing::debug!(stamp = next.stamp, path = %self.path.display(), "refresh record written");
                Ok(CasOutcome::Applied { stamp: next.stamp })
            }
        }
    }

    fn watch(&self) -> Option<StampWatch> {
        None
    }
}
