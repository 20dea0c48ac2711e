//! Refresh operator for one database unit.
//!
//! Each unit runs the same agent. Units never talk to each other directly:
//! they coordinate through the shared, stamped refresh record, and only the
//! unit whose turn it is may advance it.
//!
//! ```text
//!   platform signals ──┐
//!   peer store writes ─┼──> UnitAgent ──> RefreshController ──> PeerChannel
//!   requeue / tick ────┘                        │
//!                                               ├──> TopologyProvider (HA coordinator)
//!   operator actions ──> ActionGateway ─────────┼──> WorkloadManager
//!                                               └──> OperationMonitor
//! ```
//!
//! # Example
//!
//! ```yaml
//! # /etc/keel/agent.yaml
//! unit: postgresql/0
//! application: postgresql
//! peerStore: /var/lib/keel/refresh.json
//! pausePolicy: first
//! coordinator:
//!   url: http://10.0.0.4:8008
//! workload:
//!   versionCommand: cat /var/lib/keel/workload-version
//!   switchCommand: snap refresh charmed-postgresql --revision={revision}
//!   probeCommand: pg_isready -q
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod audit;
pub mod backoff;
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod operations;
pub mod signal;
pub mod status;
pub mod workload;

pub use agent::{AgentHandle, UnitAgent};
pub use collaborators::{OperationMonitor, TopologyProvider, WorkloadManager};
pub use config::AgentConfig;
pub use controller::{ControllerContext, ReconcileAction, RefreshController};
pub use error::{OperatorError, OperatorResult, WorkloadError};
pub use gateway::{ActionGateway, ActionOutcome, ActionResult};
pub use signal::LifecycleSignal;
pub use status::{StatusFormatter, StatusLevel, StatusReport};
