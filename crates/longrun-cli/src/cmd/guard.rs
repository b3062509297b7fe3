use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use longrun_core::config::Config;
use longrun_core::guard::{CommandGuard, CommandPolicy};
use std::path::Path;

#[derive(Subcommand)]
pub enum GuardSubcommand {
    /// Evaluate a shell command against the project's policy
    Check {
        /// The full command line, quoted as one argument
        command: String,
    },
}

pub fn run(root: &Path, subcmd: GuardSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        GuardSubcommand::Check { command } => check(root, &command, json),
    }
}

fn check(root: &Path, command: &str, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let guard = CommandGuard::new(config.policy)?;
    let verdict = guard.evaluate(command);

    if json {
        print_json(&serde_json::json!({
            "command": command,
            "allowed": verdict.is_allowed(),
            "reason": verdict.reason(),
        }))?;
    } else if verdict.is_allowed() {
        println!("allow: {command}");
    } else {
        println!("deny: {command}");
    }

    verdict.into_result(command)?;
    Ok(())
}
