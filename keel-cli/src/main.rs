//! keel CLI - hook and action entry points for rolling database refreshes.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::action::Action;
use keel_operator::observability::{TracingConfig, init_tracing};
use std::process::ExitCode;

/// keel - Rolling refresh orchestration for replicated database clusters.
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deliver a lifecycle signal to this unit
    Hook {
        /// Signal name: config-changed, peer-changed, update-status,
        /// refresh-available or requeue
        signal: String,

        /// New version for refresh-available, as workload@revision
        #[arg(long)]
        target_version: Option<String>,
    },

    /// Run an operator action
    Action {
        #[command(subcommand)]
        action: ActionCommand,
    },

    /// Preview the preflight verdict and refresh order for a topology file
    Plan {
        /// YAML or JSON list of unit statuses
        #[arg(short, long)]
        topology: String,

        /// Agent configuration supplying gate thresholds and operation markers
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ActionCommand {
    /// Run the cluster preflight and freeze the refresh plan
    PreRefreshCheck,

    /// Confirm the next unit of a paused refresh
    ResumeRefresh {
        /// Unit expected to refresh next
        #[arg(short, long)]
        unit: String,
    },

    /// Abort the refresh and roll every unit back
    ForceAbort,

    /// Reset a completed or failed refresh
    Acknowledge,

    /// Show refresh status
    Status,
}

impl From<ActionCommand> for Action {
    fn from(command: ActionCommand) -> Self {
        match command {
            ActionCommand::PreRefreshCheck => Action::PreRefreshCheck,
            ActionCommand::ResumeRefresh { unit } => Action::ResumeRefresh { unit },
            ActionCommand::ForceAbort => Action::ForceAbort,
            ActionCommand::Acknowledge => Action::Acknowledge,
            ActionCommand::Status => Action::Status,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(TracingConfig::from_env().with_verbosity(cli.verbose))?;

    let code = match cli.command {
        Commands::Hook {
            signal,
            target_version,
        } => {
            commands::hook::run(&signal, target_version.as_deref()).await?;
            0
        }
        Commands::Action { action } => commands::action::run(action.into()).await?,
        Commands::Plan { topology, config } => {
            commands::plan::run(&topology, config.as_deref()).await?
        }
        Commands::Version => {
            commands::version::run()?;
            0
        }
    };

    Ok(exit_code(code))
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_resume_with_unit() {
        let cli = Cli::try_parse_from(["keel", "action", "resume-refresh", "--unit", "db/2"]).unwrap();
        match cli.command {
            Commands::Action {
                action: ActionCommand::ResumeRefresh { unit },
            } => assert_eq!(unit, "db/2"),
            _ => panic!("expected resume-refresh"),
        }
    }

    #[test]
    fn parses_hook_with_target() {
        let cli = Cli::try_parse_from([
            "keel",
            "-vv",
            "hook",
            "refresh-available",
            "--target-version",
            "16.2@rev2",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Hook { target_version: Some(ref v), .. } if v == "16.2@rev2"
        ));
    }
}
