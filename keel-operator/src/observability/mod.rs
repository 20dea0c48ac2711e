//! Logging setup for the agent and the CLI.
//!
//! Output format is controlled via `KEEL_LOG_FORMAT`:
//! - `json` - one JSON object per line (for log shippers)
//! - `pretty` - multi-line human-readable output (default for a TTY)
//! - `compact` - single-line output
//!
//! Filtering uses `KEEL_LOG_LEVEL`, falling back to `RUST_LOG`. Logs go to
//! stderr; stdout is reserved for action results.
//!
//! # Example
//!
//! ```no_run
//! use keel_operator::observability::{TracingConfig, init_tracing};
//!
//! # fn main() -> anyhow::Result<()> {
//! init_tracing(TracingConfig::from_env().with_verbosity(1))?;
//! # Ok(())
//! # }
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig};
pub use tracing_setup::init_tracing;
