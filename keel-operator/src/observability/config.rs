//! Logging configuration.

use std::env;
use std::str::FromStr;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for structured logging.
    Json,
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            "compact" => Self::Compact,
            _ => Self::default(),
        })
    }
}

/// Logging settings for the agent and the CLI.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    log_format: LogFormat,
    /// Filter directives, e.g. `info` or `warn,keel_operator=debug`.
    log_filter: String,
    include_location: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
            include_location: false,
        }
    }
}

impl TracingConfig {
    /// Read the settings from the environment.
    ///
    /// - `KEEL_LOG_FORMAT`: "json", "pretty", or "compact". Unset picks
    ///   pretty on a terminal and JSON otherwise.
    /// - `KEEL_LOG_LEVEL` or `RUST_LOG`: log filter string
    /// - `KEEL_LOG_LOCATION`: "true" to include file and line
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok(), stderr_is_terminal())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>, terminal: bool) -> Self {
        let log_format = match var("KEEL_LOG_FORMAT") {
            Some(s) => s.parse::<LogFormat>().unwrap_or_default(),
            None if terminal => LogFormat::Pretty,
            None => LogFormat::Json,
        };

        Self {
            log_format,
            log_filter: var("KEEL_LOG_LEVEL")
                .or_else(|| var("RUST_LOG"))
                .unwrap_or_else(|| "info".to_string()),
            include_location: var("KEEL_LOG_LOCATION").is_some_and(|s| s == "true" || s == "1"),
        }
    }

    /// Raise the filter for `-v` flags: one for debug, two or more for trace.
    #[must_use]
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        match verbose {
            0 => {}
            1 => self.log_filter = "debug".to_string(),
            _ => self.log_filter = "trace".to_string(),
        }
        self
    }

    /// Output format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Filter directives.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Whether file and line are logged.
    pub fn include_location(&self) -> bool {
        self.include_location
    }
}

fn stderr_is_terminal() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}
