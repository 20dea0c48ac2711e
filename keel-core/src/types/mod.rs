//! Core types for keel.
//!
//! - `UnitId`: identifier of a unit of the application (`postgresql/2`)
//! - `Role`: cluster role reported by the HA coordinator
//! - `VersionPair`: workload version plus orchestrator revision
//! - `RefreshId`: identifier of one refresh run

mod ids;

pub use ids::{RefreshId, Role, UnitId, VersionPair};
