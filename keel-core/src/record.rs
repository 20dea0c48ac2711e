//! Flat key/value encoding of the refresh record.
//!
//! The peer-shared configuration store only holds string pairs, so
//! [`VersionedRefresh`] is flattened into `refresh.*` keys. Optional fields
//! are omitted when unset; an empty store decodes to the idle record at
//! stamp 0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::RecordError;
use crate::refresh::{ClusterRefresh, PausePolicy, RefreshPhase};
use crate::types::{RefreshId, UnitId, VersionPair};

/// Record keys.
pub mod keys {
    /// Monotonic write stamp.
    pub const STAMP: &str = "refresh.stamp";
    /// Refresh run identifier.
    pub const ID: &str = "refresh.id";
    /// Current phase.
    pub const PHASE: &str = "refresh.phase";
    /// Version before the refresh.
    pub const ORIGINAL_VERSION: &str = "refresh.originalVersion";
    /// Version being refreshed to.
    pub const TARGET_VERSION: &str = "refresh.targetVersion";
    /// Comma-joined unit order.
    pub const PLANNED_ORDER: &str = "refresh.plannedOrder";
    /// Completed unit count.
    pub const CURSOR: &str = "refresh.cursor";
    /// Pause policy.
    pub const PAUSE_POLICY: &str = "refresh.pausePolicy";
    /// Version being rolled back from.
    pub const ROLLBACK_OF: &str = "refresh.rollbackOf";
    /// Last confirmed cursor.
    pub const CONFIRMED_CURSOR: &str = "refresh.confirmedCursor";
    /// Unit currently switching.
    pub const STEP_IN_FLIGHT: &str = "refresh.stepInFlight";
    /// Leader when the plan was frozen.
    pub const LEADER_AT_PLANNING: &str = "refresh.leaderAtPlanning";
    /// Failure detail.
    pub const LAST_ERROR: &str = "refresh.lastError";
    /// Rollback command captured at preflight.
    pub const ROLLBACK_COMMAND: &str = "refresh.rollbackCommand";
    /// RFC 3339 time of the last write.
    pub const UPDATED_AT: &str = "refresh.updatedAt";
}

/// The refresh record together with its write stamp.
///
/// Every accepted write increments `stamp` by exactly one; a writer whose
/// expected stamp is stale loses the compare-and-swap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRefresh {
    /// Write stamp.
    pub stamp: u64,
    /// The record.
    pub refresh: ClusterRefresh,
    /// When the record was last written.
    pub updated_at: Option<DateTime<Utc>>,
}

impl VersionedRefresh {
    /// The idle record at stamp 0.
    pub fn initial() -> Self {
        Self::default()
    }

    /// Successor of this record carrying `refresh`.
    pub fn successor(&self, refresh: ClusterRefresh, at: DateTime<Utc>) -> Self {
        Self {
            stamp: self.stamp + 1,
            refresh,
            updated_at: Some(at),
        }
    }

    /// Flatten to string pairs.
    pub fn encode(&self) -> BTreeMap<String, String> {
        let r = &self.refresh;
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            map.insert(key.to_string(), value);
        };

        put(keys::STAMP, self.stamp.to_string());
        put(keys::PHASE, r.phase.as_str().to_string());
        put(keys::PAUSE_POLICY, r.pause_policy.as_str().to_string());
        put(keys::CURSOR, r.cursor.to_string());
        put(
            keys::PLANNED_ORDER,
            r.planned_order
                .iter()
                .map(UnitId::as_str)
                .collect::<Vec<_>>()
                .join(","),
        );

        if let Some(id) = &r.id {
            put(keys::ID, id.to_string());
        }
        if let Some(v) = &r.original_version {
            put(keys::ORIGINAL_VERSION, v.to_string());
        }
        if let Some(v) = &r.target_version {
            put(keys::TARGET_VERSION, v.to_string());
        }
        if let Some(v) = &r.rollback_of {
            put(keys::ROLLBACK_OF, v.to_string());
        }
        if let Some(c) = r.confirmed_cursor {
            put(keys::CONFIRMED_CURSOR, c.to_string());
        }
        if let Some(u) = &r.step_in_flight {
            put(keys::STEP_IN_FLIGHT, u.to_string());
        }
        if let Some(u) = &r.leader_at_planning {
            put(keys::LEADER_AT_PLANNING, u.to_string());
        }
        if let Some(e) = &r.last_error {
            put(keys::LAST_ERROR, e.clone());
        }
        if let Some(c) = &r.rollback_command {
            put(keys::ROLLBACK_COMMAND, c.clone());
        }
        if let Some(t) = &self.updated_at {
            put(keys::UPDATED_AT, t.to_rfc3339());
        }
        map
    }

    /// Rebuild from string pairs, validating cross-field consistency.
    pub fn decode(map: &BTreeMap<String, String>) -> Result<Self, RecordError> {
        if map.is_empty() {
            return Ok(Self::initial());
        }

        let phase: RefreshPhase = required(map, keys::PHASE)?;
        let stamp: u64 = optional(map, keys::STAMP)?.unwrap_or(0);
        let pause_policy: PausePolicy = optional(map, keys::PAUSE_POLICY)?.unwrap_or_default();
        let cursor: usize = optional(map, keys::CURSOR)?.unwrap_or(0);
        let planned_order = match map.get(keys::PLANNED_ORDER) {
            Some(raw) if !raw.is_empty() => raw
                .split(',')
                .map(|u| UnitId::parse(u).map_err(|e| invalid(keys::PLANNED_ORDER, raw, e)))
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        let refresh = ClusterRefresh {
            id: optional::<IdField>(map, keys::ID)?.map(|f| f.0),
            original_version: optional(map, keys::ORIGINAL_VERSION)?,
            target_version: optional(map, keys::TARGET_VERSION)?,
            phase,
            pause_policy,
            planned_order,
            cursor,
            rollback_of: optional(map, keys::ROLLBACK_OF)?,
            confirmed_cursor: optional(map, keys::CONFIRMED_CURSOR)?,
            step_in_flight: optional(map, keys::STEP_IN_FLIGHT)?,
            leader_at_planning: optional(map, keys::LEADER_AT_PLANNING)?,
            last_error: map.get(keys::LAST_ERROR).cloned(),
            rollback_command: map.get(keys::ROLLBACK_COMMAND).cloned(),
        };

        let updated_at = match map.get(keys::UPDATED_AT) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| invalid(keys::UPDATED_AT, raw, e))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        validate(&refresh)?;
        Ok(Self {
            stamp,
            refresh,
            updated_at,
        })
    }
}

/// Check cross-field invariants of a decoded record.
pub fn validate(r: &ClusterRefresh) -> Result<(), RecordError> {
    if r.cursor > r.planned_order.len() {
        return Err(RecordError::Inconsistent(format!(
            "cursor {} exceeds planned order of {} units",
            r.cursor,
            r.planned_order.len()
        )));
    }

    let needs = |present: bool, key: &'static str| {
        if present {
            Ok(())
        } else {
            Err(RecordError::MissingField { key })
        }
    };

    match r.phase {
        RefreshPhase::Idle => {}
        RefreshPhase::PreflightPassed | RefreshPhase::Failed => {
            needs(r.original_version.is_some(), keys::ORIGINAL_VERSION)?;
            needs(!r.planned_order.is_empty(), keys::PLANNED_ORDER)?;
        }
        RefreshPhase::InProgress | RefreshPhase::Paused | RefreshPhase::Completed => {
            needs(r.original_version.is_some(), keys::ORIGINAL_VERSION)?;
            needs(r.target_version.is_some(), keys::TARGET_VERSION)?;
            needs(!r.planned_order.is_empty(), keys::PLANNED_ORDER)?;
        }
        RefreshPhase::RolledBack => {
            needs(r.original_version.is_some(), keys::ORIGINAL_VERSION)?;
            needs(r.target_version.is_some(), keys::TARGET_VERSION)?;
            needs(r.rollback_of.is_some(), keys::ROLLBACK_OF)?;
            needs(!r.planned_order.is_empty(), keys::PLANNED_ORDER)?;
        }
    }

    if let Some(unit) = &r.step_in_flight {
        if r.position_of(unit) != Some(r.cursor) {
            return Err(RecordError::Inconsistent(format!(
                "step in flight for {unit} which is not at the cursor"
            )));
        }
    }

    Ok(())
}

struct IdField(RefreshId);

impl FromStr for IdField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RefreshId::parse(s)
            .map(IdField)
            .ok_or_else(|| "not a refresh id".to_string())
    }
}

fn required<T>(map: &BTreeMap<String, String>, key: &'static str) -> Result<T, RecordError>
where
    T: FromStr,
    T::Err: ToString,
{
    optional(map, key)?.ok_or(RecordError::MissingField { key })
}

fn optional<T>(map: &BTreeMap<String, String>, key: &'static str) -> Result<Option<T>, RecordError>
where
    T: FromStr,
    T::Err: ToString,
{
    map.get(key)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(key, raw, e)))
        .transpose()
}

fn invalid(key: &'static str, value: &str, cause: impl ToString) -> RecordError {
    RecordError::InvalidField {
        key,
        value: value.to_string(),
        cause: cause.to_string(),
    }
}
