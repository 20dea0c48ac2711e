//! Client for the HA coordinator's REST status surface.
//!
//! The coordinator is authoritative for cluster membership and roles. This
//! crate only reads it, translating the member list into a
//! [`keel_core::TopologyView`].
//!
//! # Example
//!
//! ```no_run
//! use keel_client::Client;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new("http://localhost:8008")?;
//! let view = client.cluster_status().await?;
//! for member in view.members() {
//!     println!("{} {}", member.unit_id, member.role);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! ```no_run
//! # use keel_client::{Client, ClientError};
//! # async fn example() -> Result<(), ClientError> {
//! # let client = Client::new("http://localhost:8008")?;
//! match client.cluster_status().await {
//!     Ok(view) => println!("{} members", view.len()),
//!     Err(ClientError::Api { status: 503, .. }) => println!("coordinator not ready"),
//!     Err(e) => println!("Error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod cluster;
mod error;
mod types;

pub use client::{Client, DEFAULT_TIMEOUT};
pub use cluster::member_status;
pub use error::{ClientError, Result};
pub use types::{ClusterInfo, Lag, MemberInfo};
