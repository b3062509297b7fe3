use thiserror::Error;

use crate::checklist::Violation;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("requirements draft at {path} is awaiting human review: re-run with --approved once reviewed")]
    PendingApproval { path: String },

    #[error("checklist integrity violation ({} change(s) rejected): {}", .violations.len(), summarize(.violations))]
    ChecklistIntegrity { violations: Vec<Violation> },

    #[error("command denied: {reason}")]
    CommandDenied { command: String, reason: String },

    #[error("session exceeded its {limit_secs}s limit")]
    SessionTimeout { limit_secs: u64 },

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("checklist already exists: {0}")]
    AlreadyExists(String),

    #[error("feature not found: {0}")]
    NotFound(String),

    #[error("invalid transition for '{id}': {reason}")]
    InvalidTransition { id: String, reason: String },

    #[error("unauthorized checklist change: {}", summarize(.violations))]
    Unauthorized { violations: Vec<Violation> },

    #[error("project is locked by another run: {0}")]
    Locked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl HarnessError {
    /// Errors local to one feature attempt; the coding loop logs them and
    /// moves on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HarnessError::SessionTimeout { .. }
                | HarnessError::ExternalService(_)
                | HarnessError::CommandDenied { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
