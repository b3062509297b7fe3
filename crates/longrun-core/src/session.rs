use crate::error::Result;
use crate::guard::{CommandPolicy, Verdict};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Which kind of agent session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Refine,
    Initialize,
    Code,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Refine => "refine",
            Phase::Initialize => "initialize",
            Phase::Code => "code",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub phase: Phase,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub project_dir: PathBuf,
    pub max_turns: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SessionStatus {
    Completed,
    Failed(String),
    TurnLimit,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Completed => f.write_str("completed"),
            SessionStatus::Failed(reason) => write!(f, "failed ({reason})"),
            SessionStatus::TurnLimit => f.write_str("turn limit reached"),
        }
    }
}

/// A shell command the agent proposed, with the guard's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedCommand {
    pub command: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    pub final_text: String,
    pub tool_uses: Vec<String>,
    pub commands: Vec<ObservedCommand>,
    pub files_touched: Vec<PathBuf>,
    pub turns: u32,
    pub cost_usd: f64,
}

impl SessionOutcome {
    pub fn new(status: SessionStatus, final_text: impl Into<String>) -> Self {
        Self {
            status,
            final_text: final_text.into(),
            tool_uses: Vec::new(),
            commands: Vec::new(),
            files_touched: Vec::new(),
            turns: 0,
            cost_usd: 0.0,
        }
    }

    pub fn denied(&self) -> impl Iterator<Item = &ObservedCommand> {
        self.commands.iter().filter(|c| !c.verdict.is_allowed())
    }
}

/// Runs one memory-less agent session against the project directory.
///
/// Implementations must route every proposed shell command through `policy`
/// before it executes and report the verdicts in the outcome.
pub trait SessionClient {
    fn invoke(&mut self, request: &SessionRequest, policy: &dyn CommandPolicy)
        -> Result<SessionOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        assert_eq!(SessionStatus::Completed.to_string(), "completed");
        assert_eq!(
            SessionStatus::Failed("boom".into()).to_string(),
            "failed (boom)"
        );
    }

    #[test]
    fn denied_filters_verdicts() {
        let mut outcome = SessionOutcome::new(SessionStatus::Completed, "");
        outcome.commands = vec![
            ObservedCommand {
                command: "ls".into(),
                verdict: Verdict::Allow,
            },
            ObservedCommand {
                command: "rm -rf /".into(),
                verdict: Verdict::Deny {
                    reason: "nope".into(),
                },
            },
        ];
        let denied: Vec<_> = outcome.denied().map(|c| c.command.as_str()).collect();
        assert_eq!(denied, vec!["rm -rf /"]);
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Phase::Initialize).unwrap(), "\"initialize\"");
    }
}
