//! `PreToolUse` hook invoked by the agent CLI before each tool call.
//!
//! Empty stdout allows the call. A deny prints the hook decision JSON. Input
//! that cannot be parsed, or a policy that cannot be loaded, is denied.

use anyhow::Context;
use clap::Subcommand;
use longrun_core::config::Config;
use longrun_core::guard::{CommandGuard, CommandPolicy, Verdict};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

#[derive(Subcommand)]
pub enum HookSubcommand {
    /// Read a PreToolUse event from stdin
    PreToolUse,
}

#[derive(Debug, Deserialize)]
struct HookInput {
    tool_name: String,
    #[serde(default)]
    tool_input: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HookDecision {
    hook_event_name: &'static str,
    permission_decision: &'static str,
    permission_decision_reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HookOutput {
    hook_specific_output: HookDecision,
}

impl HookOutput {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            hook_specific_output: HookDecision {
                hook_event_name: "PreToolUse",
                permission_decision: "deny",
                permission_decision_reason: reason.into(),
            },
        }
    }
}

pub fn run(root: &Path, subcmd: HookSubcommand) -> anyhow::Result<()> {
    match subcmd {
        HookSubcommand::PreToolUse => pre_tool_use(root),
    }
}

fn pre_tool_use(root: &Path) -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read hook input")?;

    let output = match load_guard(root) {
        Ok(guard) => decide(&input, &guard),
        Err(e) => Some(HookOutput::deny(format!("command policy unavailable: {e:#}"))),
    };

    if let Some(output) = output {
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{}", serde_json::to_string(&output)?)?;
    }
    Ok(())
}

fn load_guard(root: &Path) -> anyhow::Result<CommandGuard> {
    let config = Config::load(root).context("failed to load config")?;
    Ok(CommandGuard::new(config.policy)?)
}

/// `None` allows the tool call.
fn decide(input: &str, policy: &dyn CommandPolicy) -> Option<HookOutput> {
    let hook: HookInput = match serde_json::from_str(input.trim()) {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable hook input, denying");
            return Some(HookOutput::deny(format!("unparseable hook input: {e}")));
        }
    };
    if hook.tool_name != "Bash" {
        return None;
    }
    let Some(command) = hook.tool_input.get("command").and_then(|c| c.as_str()) else {
        return Some(HookOutput::deny("Bash call without a command"));
    };
    match policy.evaluate(command) {
        Verdict::Allow => {
            tracing::debug!(%command, "allowed");
            None
        }
        Verdict::Deny { reason } => {
            tracing::warn!(%command, %reason, "denied");
            Some(HookOutput::deny(reason))
        }
    }
}
