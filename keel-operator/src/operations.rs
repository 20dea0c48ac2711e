//! Operation monitor reading marker files.
//!
//! The backup engine and the scaler drop a file named after the operation
//! (`backup`, `restore`, `scale`, optionally with an extension such as
//! `backup.lock`) into the marker directory while they run.

use async_trait::async_trait;
use keel_core::{OperationKind, OperationsInFlight};
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::collaborators::OperationMonitor;
use crate::error::OperatorResult;

/// Reports operations whose marker files exist.
#[derive(Debug, Clone)]
pub struct MarkerOperationMonitor {
    dir: PathBuf,
}

impl MarkerOperationMonitor {
    /// Watch `dir` for markers.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The marker directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn kind_of(stem: &str) -> Option<OperationKind> {
    match stem {
        "backup" => Some(OperationKind::Backup),
        "restore" => Some(OperationKind::Restore),
        "scale" => Some(OperationKind::Scale),
        _ => None,
    }
}

#[async_trait]
impl OperationMonitor for MarkerOperationMonitor {
    async fn operations_in_flight(&self) -> OperatorResult<OperationsInFlight> {
        let mut ops = OperationsInFlight::none();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ops),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stem = name.split('.').next().unwrap_or_default();
            if let Some(kind) = kind_of(stem) {
                trace!(marker = %name, "Operation marker present");
                ops.insert(kind);
            }
        }
        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_dir_means_nothing_running() {
        let monitor = MarkerOperationMonitor::new("/nonexistent/keel/markers");
        assert!(monitor.operations_in_flight().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn markers_are_reported() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::write(dir.path().join("backup.lock"), b"").unwrap();
        std::fs::write(dir.path().join("unrelated"), b"").unwrap();

        let monitor = MarkerOperationMonitor::new(dir.path());
        let ops = monitor.operations_in_flight().await.unwrap();
        assert_eq!(ops.iter().collect::<Vec<_>>(), vec![OperationKind::Backup]);

        std::fs::write(dir.path().join("scale"), b"").unwrap();
        let ops = monitor.operations_in_flight().await.unwrap();
        assert_eq!(ops.iter().count(), 2);
    }
}
