//! Subscriber installation.

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::{LogFormat, TracingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber, writing to stderr.
///
/// Fails if a subscriber is already installed. An unparsable filter falls
/// back to `info`.
pub fn init_tracing(config: TracingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_filter()).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(output_layer(&config))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")
}

fn output_layer(config: &TracingConfig) -> BoxedLayer {
    let location = config.include_location();
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(location)
        .with_line_number(location);

    match config.log_format() {
        LogFormat::Json => layer
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}
