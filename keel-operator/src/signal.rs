//! Lifecycle signals delivered to a unit.

use keel_core::VersionPair;
use std::fmt;
use std::str::FromStr;

use crate::error::OperatorError;

/// Something happened that warrants re-evaluating the refresh.
///
/// Eligibility is never cached between signals: every signal reloads the
/// shared record and re-runs the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Unit configuration changed.
    ConfigChanged,
    /// The shared refresh record changed.
    PeerChanged,
    /// Periodic status refresh.
    UpdateStatus,
    /// The platform made a new version available.
    RefreshAvailable {
        /// The new version.
        target_version: VersionPair,
    },
    /// A requeue timer fired.
    Requeue,
}

impl LifecycleSignal {
    /// Stable signal name, as accepted by [`LifecycleSignal::parse`].
    pub const fn name(&self) -> &'static str {
        match self {
            LifecycleSignal::ConfigChanged => "config-changed",
            LifecycleSignal::PeerChanged => "peer-changed",
            LifecycleSignal::UpdateStatus => "update-status",
            LifecycleSignal::RefreshAvailable { .. } => "refresh-available",
            LifecycleSignal::Requeue => "requeue",
        }
    }

    /// Build a signal from its name; `refresh-available` needs a target.
    pub fn parse(name: &str, target_version: Option<VersionPair>) -> Result<Self, OperatorError> {
        Ok(match name {
            "config-changed" => LifecycleSignal::ConfigChanged,
            "peer-changed" => LifecycleSignal::PeerChanged,
            "update-status" => LifecycleSignal::UpdateStatus,
            "requeue" => LifecycleSignal::Requeue,
            "refresh-available" => LifecycleSignal::RefreshAvailable {
                target_version: target_version.ok_or_else(|| {
                    OperatorError::InvalidConfig("refresh-available requires a target version".into())
                })?,
            },
            other => {
                return Err(OperatorError::InvalidConfig(format!(
                    "unknown signal '{other}'"
                )));
            }
        })
    }
}

impl fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleSignal::RefreshAvailable { target_version } => {
                write!(f, "refresh-available({target_version})")
            }
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for LifecycleSignal {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, None)
    }
}
