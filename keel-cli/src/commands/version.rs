//! Version command - show version information.

use anyhow::Result;

/// Version information.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command.
pub fn run() -> Result<()> {
    println!("keel - Rolling refresh orchestration for replicated databases");
    println!();
    println!("Version:     {}", VERSION);
    println!(
        "Platform:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();
    println!("Components:");
    println!("  keel-core      Refresh model, sequencer, health gate, state machine");
    println!("  keel-cluster   Shared refresh record and peer channels");
    println!("  keel-client    HA coordinator client");
    println!("  keel-operator  Refresh controller, operator actions, unit agent");
    println!("  keel-cli       Command-line interface");

    Ok(())
}
