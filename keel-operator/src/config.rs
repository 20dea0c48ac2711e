//! Unit agent configuration.

use keel_core::{GateConfig, PausePolicy, UnitId, VersionPair};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OperatorError, OperatorResult};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "KEEL_CONFIG";

/// Environment variable overriding the unit identity.
pub const UNIT_ENV: &str = "KEEL_UNIT";

/// Configuration file read when `KEEL_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/keel/agent.yaml";

/// Configuration for one unit's agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// This unit's identifier, e.g. `postgresql/0`.
    pub unit: Option<UnitId>,

    /// Application name used in rendered commands.
    pub application: String,

    /// File holding the shared refresh record.
    pub peer_store: PathBuf,

    /// How long to wait for the peer store lock, in milliseconds.
    pub lock_timeout_ms: u64,

    /// HA coordinator connection.
    pub coordinator: CoordinatorConfig,

    /// Commands that drive the local workload.
    pub workload: WorkloadCommands,

    /// Health gate thresholds.
    pub gate: GateConfig,

    /// Pause policy for new refreshes.
    pub pause_policy: PausePolicy,

    /// Retry policy for transient gate failures.
    pub backoff: BackoffConfig,

    /// Post-switch probe timeout in seconds.
    pub probe_timeout_secs: u64,

    /// Directory where the backup engine and scaler drop operation markers.
    pub operation_marker_dir: PathBuf,

    /// Template for the rollback command reported at preflight.
    ///
    /// Placeholders: `{application}`, `{workload}`, `{revision}`.
    pub rollback_command_template: String,

    /// Interval of the periodic update-status tick in seconds.
    pub update_status_interval_secs: u64,
}

/// HA coordinator connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    /// Base URL of the coordinator REST API.
    pub url: String,
    /// Basic auth user.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Shell commands for the local workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkloadCommands {
    /// Prints the running version as `workload@revision`.
    pub version_command: String,
    /// Switches to `{workload}` at `{revision}`.
    pub switch_command: String,
    /// Exits zero once the workload is healthy.
    pub probe_command: String,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// First delay in milliseconds.
    pub initial_ms: u64,
    /// Largest delay in milliseconds.
    pub max_ms: u64,
    /// Consecutive attempts before giving up until the next signal.
    pub max_attempts: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            unit: None,
            application: "postgresql".to_string(),
            peer_store: PathBuf::from("/var/lib/keel/refresh.json"),
            lock_timeout_ms: 5_000,
            coordinator: CoordinatorConfig::default(),
            workload: WorkloadCommands::default(),
            gate: GateConfig::default(),
            pause_policy: PausePolicy::default(),
            backoff: BackoffConfig::default(),
            probe_timeout_secs: 120,
            operation_marker_dir: PathBuf::from("/var/run/keel/operations"),
            rollback_command_template: "refresh {application} --revision={revision}".to_string(),
            update_status_interval_secs: 300,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8008".to_string(),
            username: None,
            password: None,
            timeout_secs: 10,
        }
    }
}

impl Default for WorkloadCommands {
    fn default() -> Self {
        Self {
            version_command: "cat /var/lib/keel/workload-version".to_string(),
            switch_command: "snap refresh charmed-postgresql --revision={revision}".to_string(),
            probe_command: "pg_isready -q".to_string(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 5_000,
            max_ms: 60_000,
            max_attempts: 8,
        }
    }
}

impl AgentConfig {
    /// Create a new configuration builder.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> OperatorResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file.
    pub fn load(path: impl AsRef<Path>) -> OperatorResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            OperatorError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Load from `KEEL_CONFIG` (or the default path) and apply `KEEL_UNIT`.
    ///
    /// A missing default file yields the built-in defaults; a missing file
    /// named by `KEEL_CONFIG` is an error.
    pub fn from_env() -> OperatorResult<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH)?,
            Err(_) => Self::default(),
        };
        if let Ok(unit) = std::env::var(UNIT_ENV) {
            config.unit = Some(UnitId::parse(unit)?);
        }
        config.validate()?;
        Ok(config)
    }

    /// This unit's identifier.
    pub fn unit_id(&self) -> OperatorResult<&UnitId> {
        self.unit
            .as_ref()
            .ok_or_else(|| OperatorError::InvalidConfig(format!("unit is required (set {UNIT_ENV})")))
    }

    /// Peer store lock timeout.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Post-switch probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Coordinator request timeout.
    pub fn coordinator_timeout(&self) -> Duration {
        Duration::from_secs(self.coordinator.timeout_secs)
    }

    /// Update-status tick interval.
    pub fn update_status_interval(&self) -> Duration {
        Duration::from_secs(self.update_status_interval_secs)
    }

    /// Render the rollback command for `version`.
    pub fn render_rollback_command(&self, version: &VersionPair) -> String {
        render(&self.rollback_command_template, &self.application, version)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> OperatorResult<()> {
        self.unit_id()?;

        if self.application.is_empty() {
            return Err(OperatorError::InvalidConfig("application is required".into()));
        }

        if self.coordinator.url.is_empty() {
            return Err(OperatorError::InvalidConfig("coordinator.url is required".into()));
        }

        if self.workload.switch_command.is_empty() || self.workload.version_command.is_empty() {
            return Err(OperatorError::InvalidConfig(
                "workload.versionCommand and workload.switchCommand are required".into(),
            ));
        }

        if self.probe_timeout_secs == 0 {
            return Err(OperatorError::InvalidConfig("probeTimeoutSecs must be > 0".into()));
        }

        if self.backoff.initial_ms == 0 || self.backoff.max_ms < self.backoff.initial_ms {
            return Err(OperatorError::InvalidConfig(format!(
                "backoff.maxMs ({}) must be >= backoff.initialMs ({}) > 0",
                self.backoff.max_ms, self.backoff.initial_ms
            )));
        }

        if self.update_status_interval_secs == 0 {
            return Err(OperatorError::InvalidConfig(
                "updateStatusIntervalSecs must be > 0".into(),
            ));
        }

        self.gate.validate()?;
        Ok(())
    }
}

/// Substitute `{application}`, `{workload}` and `{revision}` in `template`.
pub fn render(template: &str, application: &str, version: &VersionPair) -> String {
    template
        .replace("{application}", application)
        .replace("{workload}", &version.workload)
        .replace("{revision}", &version.revision)
}

/// Builder for AgentConfig.
#[derive(Debug, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    /// Set the unit identity.
    pub fn unit(mut self, unit: UnitId) -> Self {
        self.config.unit = Some(unit);
        self
    }

    /// Set the application name.
    pub fn application(mut self, name: impl Into<String>) -> Self {
        self.config.application = name.into();
        self
    }

    /// Set the peer store file.
    pub fn peer_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.peer_store = path.into();
        self
    }

    /// Set the coordinator URL.
    pub fn coordinator_url(mut self, url: impl Into<String>) -> Self {
        self.config.coordinator.url = url.into();
        self
    }

    /// Set coordinator credentials.
    pub fn coordinator_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.coordinator.username = Some(username.into());
        self.config.coordinator.password = Some(password.into());
        self
    }

    /// Set the workload commands.
    pub fn workload(mut self, commands: WorkloadCommands) -> Self {
        self.config.workload = commands;
        self
    }

    /// Set the gate thresholds.
    pub fn gate(mut self, gate: GateConfig) -> Self {
        self.config.gate = gate;
        self
    }

    /// Set the pause policy.
    pub fn pause_policy(mut self, policy: PausePolicy) -> Self {
        self.config.pause_policy = policy;
        self
    }

    /// Set the backoff policy.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the probe timeout in seconds.
    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.config.probe_timeout_secs = secs;
        self
    }

    /// Set the operation marker directory.
    pub fn operation_marker_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.operation_marker_dir = path.into();
        self
    }

    /// Set the rollback command template.
    pub fn rollback_command_template(mut self, template: impl Into<String>) -> Self {
        self.config.rollback_command_template = template.into();
        self
    }

    /// Build and validate.
    pub fn build(self) -> OperatorResult<AgentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
