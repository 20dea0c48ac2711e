//! Prelude for convenient imports.
//!
//! # Example
//!
//! ```ignore
//! use keel_core::prelude::*;
//! ```

// Identifiers
pub use crate::types::{RefreshId, Role, UnitId, VersionPair};

// Error handling
pub use crate::error::{CoreError, CoreResult, RecordError, TransitionError};

// Model
pub use crate::record::VersionedRefresh;
pub use crate::refresh::{
    ClusterRefresh, HealthCheckRecord, PausePolicy, RefreshDirection, RefreshPhase,
    UnitRefreshRecord,
};
pub use crate::topology::{TopologyView, UnitStatus};

// Decisions
pub use crate::gate::{
    GateConfig, GateFailure, GateVerdict, HealthGate, OperationKind, OperationsInFlight,
    PreflightFailure,
};
pub use crate::machine::{Effect, RefreshEvent, Transition, evaluate};
pub use crate::sequencer::UnitSequencer;
