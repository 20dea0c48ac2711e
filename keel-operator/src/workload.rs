//! Workload manager backed by shell commands.

use async_trait::async_trait;
use keel_core::VersionPair;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::collaborators::WorkloadManager;
use crate::config::{WorkloadCommands, render};
use crate::error::WorkloadError;

/// Runs the configured version, switch and probe commands through `sh -c`.
///
/// Every command is bounded by `timeout`; a command that overruns is killed.
#[derive(Debug, Clone)]
pub struct CommandWorkload {
    commands: WorkloadCommands,
    application: String,
    timeout: Duration,
}

impl CommandWorkload {
    /// Create a workload manager.
    pub fn new(commands: WorkloadCommands, application: impl Into<String>, timeout: Duration) -> Self {
        Self {
            commands,
            application: application.into(),
            timeout,
        }
    }

    async fn run(&self, command: &str) -> Result<String, WorkloadError> {
        debug!(command, "Running workload command");
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkloadError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| WorkloadError::Timeout {
                command: command.to_string(),
                after: self.timeout,
            })?
            .map_err(|source| WorkloadError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(WorkloadError::CommandFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl WorkloadManager for CommandWorkload {
    async fn local_version(&self) -> Result<VersionPair, WorkloadError> {
        let stdout = self.run(&self.commands.version_command).await?;
        stdout
            .parse()
            .map_err(|_| WorkloadError::InvalidVersion(stdout))
    }

    async fn switch_version(&self, target: &VersionPair) -> Result<(), WorkloadError> {
        let command = render(&self.commands.switch_command, &self.application, target);
        self.run(&command).await.map(|_| ())
    }

    async fn probe(&self) -> Result<(), WorkloadError> {
        self.run(&self.commands.probe_command).await.map(|_| ())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn workload(version: &str, switch: &str, probe: &str) -> CommandWorkload {
        CommandWorkload::new(
            WorkloadCommands {
                version_command: version.to_string(),
                switch_command: switch.to_string(),
                probe_command: probe.to_string(),
            },
            "postgresql",
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn reads_local_version() {
        let w = workload("echo 14.9@rev1", "true", "true");
        assert_eq!(w.local_version().await.unwrap(), VersionPair::new("14.9", "rev1"));
    }

    #[tokio::test]
    async fn rejects_garbage_version() {
        let w = workload("echo nonsense", "true", "true");
        assert!(matches!(w.local_version().await, Err(WorkloadError::InvalidVersion(_))));
    }

    #[tokio::test]
    async fn switch_renders_placeholders() {
        let w = workload("true", "test {application}-{revision} = postgresql-rev2", "true");
        w.switch_version(&VersionPair::new("16.2", "rev2")).await.unwrap();
        assert!(w.switch_version(&VersionPair::new("16.2", "rev3")).await.is_err());
    }

    #[tokio::test]
    async fn failed_probe_carries_stderr() {
        let w = workload("true", "true", "echo down >&2; exit 3");
        match w.probe().await {
            Err(WorkloadError::CommandFailed { stderr, .. }) => assert_eq!(stderr, "down"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let w = CommandWorkload::new(
            WorkloadCommands {
                version_command: "true".into(),
                switch_command: "true".into(),
                probe_command: "sleep 5".into(),
            },
            "postgresql",
            Duration::from_millis(100),
        );
        assert!(matches!(w.probe().await, Err(WorkloadError::Timeout { .. })));
    }
}
