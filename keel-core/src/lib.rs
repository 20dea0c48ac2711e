//! Keel Core Library
//!
//! Data model and decision logic for rolling refreshes of a replicated
//! database cluster. Nothing in this crate performs I/O: callers feed it
//! topology snapshots and the shared refresh record, and carry out the
//! effects it returns.
//!
//! # Key Components
//!
//! - **Topology**: read-only snapshot of members and roles
//! - **Sequencer**: role-aware refresh order (followers first, leader last)
//! - **Gate**: per-unit health gate and cluster preflight
//! - **Machine**: the pure `evaluate(state, event)` refresh state machine
//! - **Record**: flat key/value encoding of the versioned refresh record
//!
//! # Example
//!
//! ```ignore
//! use keel_core::prelude::*;
//!
//! let plan = UnitSequencer::new().plan(&view);
//! let t = evaluate(&record.refresh, RefreshEvent::Start { target_version })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod gate;
pub mod machine;
pub mod prelude;
pub mod record;
pub mod refresh;
pub mod sequencer;
pub mod topology;
pub mod types;

pub use error::{CoreError, CoreResult, RecordError, TransitionError};
pub use gate::{GateConfig, GateFailure, GateVerdict, HealthGate, OperationKind, OperationsInFlight};
pub use machine::{Effect, RefreshEvent, Transition, evaluate};
pub use record::VersionedRefresh;
pub use refresh::{ClusterRefresh, PausePolicy, RefreshDirection, RefreshPhase, UnitRefreshRecord};
pub use sequencer::UnitSequencer;
pub use topology::{TopologyView, UnitStatus};
pub use types::{RefreshId, Role, UnitId, VersionPair};
