//! Strongly-typed identifiers for units, versions and refresh runs.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Identifier of a single unit of the application, e.g. `postgresql/2`.
///
/// Unit IDs are stored inside the comma-joined `refresh.plannedOrder` value,
/// so they may not contain commas or whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId(String);

impl UnitId {
    /// Parse and validate a unit identifier.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidUnitId`] for empty identifiers or identifiers
    /// containing `,` or whitespace.
    pub fn parse(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CoreError::InvalidUnitId {
                raw,
                cause: "unit id is empty".into(),
            });
        }
        if raw.contains(',') || raw.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidUnitId {
                raw,
                cause: "unit id may not contain ',' or whitespace".into(),
            });
        }
        Ok(Self(raw))
    }

    /// Map an HA coordinator member name (`postgresql-2`) to a unit ID
    /// (`postgresql/2`).
    ///
    /// Names without a numeric `-N` suffix are taken verbatim.
    pub fn from_member_name(name: &str) -> Result<Self, CoreError> {
        match name.rsplit_once('-') {
            Some((app, number))
                if !app.is_empty()
                    && !number.is_empty()
                    && number.bytes().all(|b| b.is_ascii_digit()) =>
            {
                Self::parse(format!("{app}/{number}"))
            }
            _ => Self::parse(name),
        }
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Application part of the identifier (everything before the last `/`).
    pub fn application(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(app, _)| app)
    }

    /// Numeric unit suffix, if the identifier has one.
    pub fn number(&self) -> Option<u32> {
        self.0
            .rsplit_once('/')
            .and_then(|(_, number)| number.parse().ok())
    }
}

impl Ord for UnitId {
    fn cmp(&self, other: &Self) -> Ordering {
        // Numbered units of an application sort numerically (db/2 < db/10);
        // unnumbered identifiers sort after them, lexically.
        self.application()
            .cmp(other.application())
            .then_with(|| match (self.number(), other.number()) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for UnitId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UnitId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UnitId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UnitId> for String {
    fn from(id: UnitId) -> Self {
        id.0
    }
}

/// Cluster role of a unit as reported by the HA coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// The single unit accepting writes.
    Leader,
    /// Replica that has acknowledged the leader's most recent write.
    SyncStandby,
    /// Asynchronous replica.
    Replica,
}

impl Role {
    /// Position of this role in the refresh order (lower refreshes first).
    pub const fn refresh_rank(self) -> u8 {
        match self {
            Role::Replica => 0,
            Role::SyncStandby => 1,
            Role::Leader => 2,
        }
    }

    /// Whether this role replicates from the leader.
    pub const fn is_follower(self) -> bool {
        !matches!(self, Role::Leader)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Leader => write!(f, "leader"),
            Role::SyncStandby => write!(f, "sync-standby"),
            Role::Replica => write!(f, "replica"),
        }
    }
}

/// Opaque version identifier: workload version plus orchestrator revision.
///
/// The textual form is `workload@revision`, e.g. `16.4@rev512`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionPair {
    /// Database workload version.
    pub workload: String,
    /// Orchestrator code revision.
    pub revision: String,
}

impl VersionPair {
    /// Create a version pair.
    pub fn new(workload: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
            revision: revision.into(),
        }
    }
}

impl fmt::Display for VersionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.workload, self.revision)
    }
}

impl FromStr for VersionPair {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('@') {
            Some((workload, revision)) if !workload.is_empty() && !revision.is_empty() => {
                Ok(Self::new(workload, revision))
            }
            _ => Err(CoreError::InvalidVersion {
                raw: s.to_string(),
                cause: "expected <workload>@<revision>".into(),
            }),
        }
    }
}

impl TryFrom<String> for VersionPair {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionPair> for String {
    fn from(version: VersionPair) -> Self {
        version.to_string()
    }
}

/// Unique identifier of one refresh run, assigned at preflight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefreshId(Uuid);

impl RefreshId {
    /// Create a new random refresh ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parse a refresh ID from its UUID form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.strip_prefix("refresh_").unwrap_or(s))
            .ok()
            .map(Self)
    }
}

impl Default for RefreshId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RefreshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "refresh_{}", self.0)
    }
}
