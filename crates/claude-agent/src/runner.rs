use std::time::Duration;

use futures::StreamExt;

use crate::stream::QueryStream;
use crate::types::{ContentBlock, Message, QueryOptions, ResultMessage, ResultSubtype, UserBlock};
use crate::{ClaudeAgentError, Result};

// ─── RunConfig ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RunConfig {
    /// Replaces the CLI's default system prompt when set.
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub opts: QueryOptions,
    /// Hard wall-clock ceiling. `None` waits for the result line.
    pub timeout: Option<Duration>,
}

// ─── Transcript ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// A tool result marked `is_error`. Calls refused by a PreToolUse hook land
/// here with the hook's reason as text.
#[derive(Debug, Clone)]
pub struct ToolFailure {
    pub tool_use_id: String,
    pub text: String,
}

/// What the agent did during the run, in stream order.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub assistant_text: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_failures: Vec<ToolFailure>,
}

impl Transcript {
    fn observe(&mut self, msg: &Message) {
        match msg {
            Message::Assistant(a) => {
                let text = a.text();
                if !text.trim().is_empty() {
                    self.assistant_text.push(text);
                }
                self.tool_calls
                    .extend(a.message.content.iter().filter_map(|block| match block {
                        ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        }),
                        _ => None,
                    }));
            }
            Message::User(u) => {
                for block in u.message.content.blocks() {
                    if let UserBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error: true,
                    } = block
                    {
                        self.tool_failures.push(ToolFailure {
                            tool_use_id: tool_use_id.clone(),
                            text: content.as_ref().map(|c| c.text()).unwrap_or_default(),
                        });
                    }
                }
            }
            Message::System(_) | Message::Result(_) => {}
        }
    }
}

// ─── RunResult ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    Success,
    MaxTurns,
    MaxBudget,
    ExecutionError,
}

impl StopKind {
    fn of(result: &ResultMessage) -> Self {
        match result.subtype {
            ResultSubtype::Success if !result.is_error => StopKind::Success,
            ResultSubtype::ErrorMaxTurns => StopKind::MaxTurns,
            ResultSubtype::ErrorMaxBudgetUsd => StopKind::MaxBudget,
            _ => StopKind::ExecutionError,
        }
    }
}

#[derive(Debug)]
pub struct RunResult {
    pub session_id: String,
    /// Empty unless the run succeeded.
    pub result_text: String,
    pub total_cost_usd: f64,
    pub num_turns: u32,
    pub is_error: bool,
    pub stop: StopKind,
    pub errors: Vec<String>,
    pub transcript: Transcript,
}

// ─── Public API ───────────────────────────────────────────────────────────

/// Run one prompt to its result line.
///
/// Fails with [`ClaudeAgentError::Timeout`] when `config.timeout` elapses
/// first. The child is killed and reaped before this returns, on every path.
/// A stream that ends without a result line is a [`ClaudeAgentError::Process`]
/// error.
pub async fn run(config: RunConfig) -> Result<RunResult> {
    let mut opts = config.opts;
    if config.system_prompt.is_some() {
        opts.system_prompt = config.system_prompt;
    }
    let mut stream = QueryStream::spawn(config.prompt, opts);
    let outcome = match config.timeout {
        Some(limit) => tokio::time::timeout(limit, collect(&mut stream))
            .await
            .unwrap_or(Err(ClaudeAgentError::Timeout { limit })),
        None => collect(&mut stream).await,
    };
    stream.shutdown().await;
    outcome
}

pub(crate) async fn collect(stream: &mut QueryStream) -> Result<RunResult> {
    let mut transcript = Transcript::default();
    while let Some(msg) = stream.next().await {
        let msg = msg?;
        transcript.observe(&msg);
        if let Message::Result(r) = msg {
            let stop = StopKind::of(&r);
            tracing::debug!(session_id = %r.session_id, ?stop, turns = r.num_turns, "run finished");
            return Ok(RunResult {
                session_id: r.session_id,
                result_text: r.result.unwrap_or_default(),
                total_cost_usd: r.total_cost_usd,
                num_turns: r.num_turns,
                is_error: stop != StopKind::Success,
                stop,
                errors: r.errors,
                transcript,
            });
        }
    }
    Err(ClaudeAgentError::Process(
        "stream ended without a result message".into(),
    ))
}
