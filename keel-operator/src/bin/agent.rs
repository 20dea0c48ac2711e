//! Keel unit agent daemon.
//!
//! Reads its configuration from `KEEL_CONFIG` and its identity from
//! `KEEL_UNIT`, then reconciles the unit's part of any refresh until it
//! receives SIGINT or SIGTERM. SIGHUP is delivered as `config-changed`.

use anyhow::Context;
use keel_operator::observability::{TracingConfig, init_tracing};
use keel_operator::{AgentConfig, ControllerContext, LifecycleSignal, RefreshController, UnitAgent};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(TracingConfig::from_env())?;

    let config = AgentConfig::from_env().context("Failed to load agent configuration")?;
    let ctx = ControllerContext::from_config(&config).context("Failed to build controller context")?;
    tracing::info!(
        unit = %ctx.unit,
        peer_store = %config.peer_store.display(),
        coordinator = %config.coordinator.url,
        "Starting keel agent"
    );

    let (agent, handle) = UnitAgent::new(RefreshController::new(Arc::new(ctx)));
    let mut agent_task = tokio::spawn(agent.run());

    #[cfg(unix)]
    let signals = {
        use tokio::signal::unix::{SignalKind, signal};
        let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let handle = handle.clone();
        async move {
            loop {
                tokio::select! {
                    _ = hangup.recv() => {
                        if handle.send(LifecycleSignal::ConfigChanged).await.is_err() {
                            break;
                        }
                    }
                    _ = terminate.recv() => break,
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    };
    #[cfg(not(unix))]
    let signals = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    tokio::select! {
        result = &mut agent_task => {
            tracing::error!("Agent exited unexpectedly: {:?}", result);
            result.context("Agent task panicked")??;
            return Ok(());
        }
        () = signals => {
            tracing::info!("Shutdown requested");
            handle.shutdown();
        }
    }

    agent_task.await.context("Agent task panicked")??;
    Ok(())
}
