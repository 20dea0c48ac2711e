//! Peer-shared storage for the cluster refresh record.
//!
//! Every unit reads and writes the same [`VersionedRefresh`] through a
//! [`PeerChannel`]. Writes are compare-and-swap on the record's stamp: a
//! writer that read a stale stamp gets [`CasOutcome::Conflict`] back and
//! re-evaluates on its next signal.
//!
//! # Architecture
//!
//! ```text
//!  unit db/0          unit db/1          unit db/2
//!  ┌────────┐         ┌────────┐         ┌────────┐
//!  │ agent  │         │ agent  │         │ agent  │
//!  └───┬────┘         └───┬────┘         └───┬────┘
//!      │ load / cas       │                  │
//!  ┌───▼──────────────────▼──────────────────▼───┐
//!  │   PeerChannel (refresh.* flat key/values)   │
//!  └─────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use keel_cluster::{CasOutcome, MemoryPeerChannel, PeerChannel};
//!
//! let channel = MemoryPeerChannel::new();
//! let current = channel.load().await?;
//! match channel.compare_and_swap(current.stamp, &next).await? {
//!     CasOutcome::Applied { stamp } => { /* written */ }
//!     CasOutcome::Conflict { current } => { /* re-evaluate later */ }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod file;
pub mod memory;

pub use channel::{CasOutcome, PeerChannel, StampWatch};
pub use error::{ClusterError, ClusterResult};
pub use file::FilePeerChannel;
pub use keel_core::VersionedRefresh;
pub use memory::MemoryPeerChannel;
