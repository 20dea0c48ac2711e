//! Hook command - deliver one lifecycle signal to this unit's controller.
//!
//! The platform runs this once per event. Requeue requests cannot be honored
//! by a one-shot process, so they are reported and left to the next event.

use anyhow::{Context, Result};
use keel_core::VersionPair;
use keel_operator::{AgentConfig, ControllerContext, LifecycleSignal, ReconcileAction, RefreshController};
use serde_json::json;
use std::sync::Arc;

/// Run the hook command.
pub async fn run(signal: &str, target_version: Option<&str>) -> Result<()> {
    let target = target_version
        .map(str::parse::<VersionPair>)
        .transpose()
        .context("Invalid --target-version")?;
    let signal = LifecycleSignal::parse(signal, target)?;

    let config = AgentConfig::from_env().context("Failed to load agent configuration")?;
    let ctx = ControllerContext::from_config(&config).context("Failed to build controller context")?;
    let controller = RefreshController::new(Arc::new(ctx));

    tracing::info!(%signal, "Handling hook");
    let action = controller.handle(&signal).await?;

    let next = match action {
        ReconcileAction::Done => json!({ "signal": signal.name(), "next": "done" }),
        ReconcileAction::Requeue(delay) => json!({
            "signal": signal.name(),
            "next": "requeue",
            "afterSecs": delay.as_secs(),
        }),
        ReconcileAction::Backoff => json!({ "signal": signal.name(), "next": "backoff" }),
    };
    println!("{next}");
    Ok(())
}
