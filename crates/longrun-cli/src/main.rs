mod agent;
mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, guard::GuardSubcommand, hook::HookSubcommand};
use longrun_core::HarnessError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "longrun",
    about = "Drive a coding agent across many sessions, one verified feature at a time",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project directory (default: nearest parent with .longrun/, else cwd)
    #[arg(long, global = true, env = "LONGRUN_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the next phase: refine, initialize, or code
    Run {
        /// Approve the requirements draft before initializing
        #[arg(long)]
        approved: bool,

        /// Stop the coding loop after N sessions
        #[arg(long, value_name = "N")]
        max_iterations: Option<u32>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Application description to copy into app_spec.txt
        #[arg(long, value_name = "PATH")]
        spec: Option<PathBuf>,
    },

    /// Show phase, checklist counts, and pending features
    Status,

    /// Approve the current requirements draft
    Approve {
        /// Name recorded as the approver (default: $USER)
        #[arg(long)]
        by: Option<String>,
    },

    /// Evaluate commands against the command policy
    Guard {
        #[command(subcommand)]
        subcommand: GuardSubcommand,
    },

    /// Manage .longrun/config.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Agent CLI hook entry points
    #[command(hide = true)]
    Hook {
        #[command(subcommand)]
        subcommand: HookSubcommand,
    },
}

/// Exit code for an error chain, by its typed root cause.
fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<HarnessError>() {
        Some(HarnessError::PendingApproval { .. }) => 0,
        Some(HarnessError::Configuration(_)) => 2,
        Some(HarnessError::ChecklistIntegrity { .. } | HarnessError::Unauthorized { .. }) => 3,
        Some(HarnessError::Locked(_)) => 4,
        _ => 1,
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_project_dir(cli.project_dir.as_deref());

    let result = match cli.command {
        Commands::Run {
            approved,
            max_iterations,
            model,
            spec,
        } => cmd::run::run(
            &root,
            cmd::run::RunArgs {
                approved,
                max_iterations,
                model,
                spec,
            },
            cli.json,
        ),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Approve { by } => cmd::approve::run(&root, by, cli.json),
        Commands::Guard { subcommand } => cmd::guard::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Hook { subcommand } => cmd::hook::run(&root, subcommand),
    };

    if let Err(e) = result {
        let code = exit_code(&e);
        if code == 0 {
            println!("{e}");
        } else {
            eprintln!("error: {e:#}");
        }
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let pending: anyhow::Error = HarnessError::PendingApproval {
            path: "refined_requirements.md".into(),
        }
        .into();
        assert_eq!(exit_code(&pending), 0);
        assert_eq!(exit_code(&HarnessError::Configuration("x".into()).into()), 2);
        assert_eq!(
            exit_code(&HarnessError::ChecklistIntegrity { violations: vec![] }.into()),
            3
        );
        assert_eq!(exit_code(&HarnessError::Locked("pid 1".into()).into()), 4);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }

    #[test]
    fn context_keeps_exit_code() {
        let e = anyhow::Error::from(HarnessError::Locked("pid 1".into())).context("run failed");
        assert_eq!(exit_code(&e), 4);
    }
}
