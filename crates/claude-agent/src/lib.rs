//! `claude-agent`: drives the `claude` CLI over its stream-json protocol.
//!
//! ```text
//! QueryOptions ─▶ ClaudeProcess ─▶ QueryStream ─▶ runner::run ─▶ RunResult
//!                 (child, JSONL)   (mpsc task)    (transcript, timeout)
//! ```
//!
//! ```rust,ignore
//! use claude_agent::{agent_run, QueryOptions, RunConfig};
//! use std::time::Duration;
//!
//! let result = agent_run(RunConfig {
//!     system_prompt: None,
//!     prompt: "Implement feature F001.".into(),
//!     opts: QueryOptions { max_turns: Some(50), ..Default::default() },
//!     timeout: Some(Duration::from_secs(3600)),
//! })
//! .await?;
//! println!("{} in {} turns", result.result_text, result.num_turns);
//! ```

pub mod error;
pub mod runner;
pub mod stream;
pub mod types;

pub(crate) mod process;

pub use error::ClaudeAgentError;
pub use runner::{
    run as agent_run, RunConfig, RunResult, StopKind, ToolCall, ToolFailure, Transcript,
};
pub use stream::QueryStream;
pub use types::{Message, PermissionMode, QueryOptions};

pub type Result<T> = std::result::Result<T, ClaudeAgentError>;
