//! Plan command - preview the preflight verdict and refresh order for a
//! topology snapshot, without touching the shared record.

use anyhow::{Context, Result};
use keel_core::{GateConfig, HealthGate, OperationsInFlight, TopologyView, UnitSequencer, UnitStatus};
use keel_operator::AgentConfig;
use keel_operator::OperationMonitor;
use keel_operator::operations::MarkerOperationMonitor;
use serde_json::{Value, json};
use std::path::Path;

/// Run the plan command. Returns the process exit code: 0 when the preflight
/// would pass, 2 when it would be blocked.
pub async fn run(topology: &str, config: Option<&str>) -> Result<i32> {
    let view = read_topology(Path::new(topology))?;

    let (gate, ops) = match config {
        Some(path) => {
            let config = AgentConfig::load(path).context("Failed to load agent configuration")?;
            let ops = MarkerOperationMonitor::new(config.operation_marker_dir.clone())
                .operations_in_flight()
                .await?;
            (config.gate, ops)
        }
        None => (GateConfig::default(), OperationsInFlight::none()),
    };

    let (preview, passed) = preview(&view, gate, &ops);
    let text = serde_json::to_string_pretty(&preview).context("Failed to encode plan")?;
    println!("{text}");
    Ok(if passed { 0 } else { 2 })
}

/// Parse a topology file: a YAML or JSON list of unit statuses.
fn read_topology(path: &Path) -> Result<TopologyView> {
    if !path.exists() {
        anyhow::bail!("Topology file not found: {}", path.display());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let members: Vec<UnitStatus> =
        serde_yaml::from_str(&content).context("Topology must be a list of unit statuses")?;
    Ok(TopologyView::new(members))
}

fn preview(view: &TopologyView, gate: GateConfig, ops: &OperationsInFlight) -> (Value, bool) {
    let gate = HealthGate::new(gate);
    let sequencer = UnitSequencer::new();
    let order = sequencer.plan(view);

    match gate.preflight(view, ops) {
        Ok(()) => (
            json!({
                "preflight": "passed",
                "plannedOrder": order,
                "leader": view.leader(),
                "quorumMargin": view.quorum_margin(),
            }),
            true,
        ),
        Err(failure) => (
            json!({
                "preflight": "blocked",
                "reason": failure.to_string(),
                "failure": failure,
                "plannedOrder": order,
            }),
            false,
        ),
    }
}
