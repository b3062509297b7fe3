use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaudeAgentError {
    #[error("failed to start `{exe}`: {source}")]
    Spawn {
        exe: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unparseable stream-json line: {source}\n  line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("claude process error: {0}")]
    Process(String),

    #[error("run exceeded its {}s wall-clock limit", .limit.as_secs())]
    Timeout { limit: Duration },
}
