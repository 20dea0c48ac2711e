//! Action command - run an operator action and print its result.

use anyhow::{Context, Result};
use keel_operator::{ActionGateway, ActionResult, AgentConfig, ControllerContext};
use std::sync::Arc;

/// Operator action to run.
#[derive(Debug, Clone)]
pub enum Action {
    /// Cluster preflight and plan.
    PreRefreshCheck,
    /// Confirm the next unit of a paused walk.
    ResumeRefresh {
        /// Unit the operator expects to refresh next.
        unit: String,
    },
    /// Abort and roll back.
    ForceAbort,
    /// Reset a finished refresh.
    Acknowledge,
    /// Status projection.
    Status,
}

/// Run the action, print the result as JSON, and return the process exit code.
pub async fn run(action: Action) -> Result<i32> {
    let config = AgentConfig::from_env().context("Failed to load agent configuration")?;
    let ctx = ControllerContext::from_config(&config).context("Failed to build controller context")?;
    let gateway = ActionGateway::new(Arc::new(ctx));

    tracing::debug!(?action, "Running action");
    let result = match action {
        Action::PreRefreshCheck => gateway.pre_refresh_check().await?,
        Action::ResumeRefresh { unit } => gateway.resume_refresh(&unit).await?,
        Action::ForceAbort => gateway.force_abort().await?,
        Action::Acknowledge => gateway.acknowledge().await?,
        Action::Status => gateway.status().await?,
    };

    print_result(&result)?;
    Ok(result.outcome.exit_code())
}

fn print_result(result: &ActionResult) -> Result<()> {
    let text = serde_json::to_string_pretty(result).context("Failed to encode action result")?;
    println!("{text}");
    Ok(())
}
