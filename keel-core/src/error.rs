//! Error types for keel-core.
//!
//! Errors carry the identifiers involved (unit, phase, record key) so a
//! status line or log entry built from them is actionable on its own.

use thiserror::Error;

use crate::refresh::RefreshPhase;
use crate::types::{UnitId, VersionPair};

/// Errors for identifier and version parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A unit identifier failed validation.
    #[error("E001: Invalid unit id '{raw}': {cause}")]
    InvalidUnitId {
        /// The rejected input.
        raw: String,
        /// Why it was rejected.
        cause: String,
    },

    /// A version identifier failed validation.
    #[error("E002: Invalid version '{raw}': {cause}")]
    InvalidVersion {
        /// The rejected input.
        raw: String,
        /// Why it was rejected.
        cause: String,
    },

    /// Configuration value is out of range.
    #[error("E003: Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by the refresh state machine when an event cannot be
/// applied to the current record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The event is not accepted in the current phase.
    #[error("E101: Event '{event}' is not valid in phase {phase}")]
    InvalidTransition {
        /// Phase the record was in.
        phase: RefreshPhase,
        /// Name of the rejected event.
        event: &'static str,
    },

    /// A unit tried to act while it is not the permitted unit.
    #[error("E102: Unit {unit} is not permitted to act (next permitted: {expected:?})")]
    NotPermitted {
        /// The unit that attempted the step.
        unit: UnitId,
        /// The unit whose turn it actually is.
        expected: Option<UnitId>,
    },

    /// A resume hint named a unit that is not yet due.
    #[error("E103: Resume hint {hint} does not match the next unit {expected}")]
    UnexpectedUnitHint {
        /// The unit supplied by the operator.
        hint: UnitId,
        /// The unit awaiting confirmation.
        expected: UnitId,
    },

    /// The unit does not appear in the planned order.
    #[error("E104: Unit {unit} is not part of the refresh plan")]
    UnknownUnit {
        /// The unknown unit.
        unit: UnitId,
    },

    /// A unit is physically switching versions; the request must be retried
    /// at the next step boundary.
    #[error("E105: Unit {unit} is switching versions; retry once the step completes")]
    StepInFlight {
        /// The unit currently switching.
        unit: UnitId,
    },

    /// The requested target equals the version already running.
    #[error("E106: Target version {version} is already the running version")]
    SameVersion {
        /// The version requested.
        version: VersionPair,
    },

    /// A refresh is in flight towards a different target.
    #[error("E107: Refresh in progress towards {current}, cannot switch target to {requested}")]
    TargetMismatch {
        /// Target of the refresh in flight.
        current: VersionPair,
        /// Target requested by the new signal.
        requested: VersionPair,
    },

    /// A plan with no units was supplied.
    #[error("E108: Refresh plan is empty")]
    EmptyPlan,
}

/// Errors decoding the flat key/value refresh record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// A required key is absent.
    #[error("E201: Refresh record is missing key '{key}'")]
    MissingField {
        /// The missing key.
        key: &'static str,
    },

    /// A key holds a value that does not parse.
    #[error("E202: Refresh record key '{key}' has invalid value '{value}': {cause}")]
    InvalidField {
        /// The offending key.
        key: &'static str,
        /// The stored value.
        value: String,
        /// Parse failure detail.
        cause: String,
    },

    /// Individually valid fields contradict each other.
    #[error("E203: Refresh record is inconsistent: {0}")]
    Inconsistent(String),
}

/// Result type for core parsing operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_codes() {
        let err = TransitionError::InvalidTransition {
            phase: RefreshPhase::Idle,
            event: "Resume",
        };
        assert!(err.to_string().starts_with("E101"));
        assert!(err.to_string().contains("idle"));

        let err = RecordError::MissingField {
            key: "refresh.phase",
        };
        assert!(err.to_string().contains("refresh.phase"));
    }
}
