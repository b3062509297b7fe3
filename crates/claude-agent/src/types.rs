use serde::Deserialize;
use std::path::PathBuf;

// ─── Wire messages ────────────────────────────────────────────────────────

/// One JSONL line of `claude --output-format stream-json`, by its `"type"`.
///
/// Only the fields the harness reads are modelled; everything else on the
/// wire is ignored. Lines with a `"type"` not listed here are skipped by the
/// process reader.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    Result(ResultMessage),
}

impl Message {
    pub fn session_id(&self) -> &str {
        match self {
            Message::System(m) => &m.session_id,
            Message::Assistant(m) => &m.session_id,
            Message::User(m) => &m.session_id,
            Message::Result(m) => &m.session_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemMessage {
    pub subtype: String,
    pub session_id: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    pub session_id: String,
    pub message: AssistantBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantBody {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Thinking and any block type added later.
    #[serde(other)]
    Other,
}

impl AssistantMessage {
    /// Text blocks of this turn, concatenated.
    pub fn text(&self) -> String {
        self.message
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserMessage {
    pub session_id: String,
    pub message: UserBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserBody {
    #[serde(default)]
    pub content: UserContent,
}

/// The echoed prompt arrives as a bare string; tool results as blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Blocks(Vec<UserBlock>),
    Text(String),
}

impl Default for UserContent {
    fn default() -> Self {
        UserContent::Blocks(Vec::new())
    }
}

impl UserContent {
    pub fn blocks(&self) -> &[UserBlock] {
        match self {
            UserContent::Blocks(b) => b,
            UserContent::Text(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserBlock {
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<ToolOutput>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Blocks(Vec<serde_json::Value>),
}

impl ToolOutput {
    pub fn text(&self) -> String {
        match self {
            ToolOutput::Text(s) => s.clone(),
            ToolOutput::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// The terminal line of every run.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMessage {
    pub subtype: ResultSubtype,
    pub session_id: String,
    /// Present only for `success`.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSubtype {
    Success,
    ErrorMaxTurns,
    ErrorMaxBudgetUsd,
    ErrorDuringExecution,
    #[serde(other)]
    Other,
}

// ─── QueryOptions ─────────────────────────────────────────────────────────

/// Flags for one `claude` invocation. `Default` passes only the protocol flags.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub model: Option<String>,
    /// `--max-turns`; the run ends with `error_max_turns` when reached.
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    /// Tools usable without a permission prompt.
    pub allowed_tools: Vec<String>,
    pub permission_mode: PermissionMode,
    pub system_prompt: Option<String>,
    /// `--settings` file (hooks, permissions).
    pub settings: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    /// Binary to run instead of `claude` from PATH.
    pub path_to_executable: Option<String>,
    pub no_session_persistence: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Message {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn system_init_keeps_model() {
        let msg = parse(
            r#"{"type":"system","subtype":"init","session_id":"s1","model":"claude-sonnet-4-5","tools":["Bash"],"cwd":"/w"}"#,
        );
        let Message::System(sys) = msg else {
            panic!("expected system")
        };
        assert_eq!(sys.subtype, "init");
        assert_eq!(sys.model.as_deref(), Some("claude-sonnet-4-5"));
    }

    #[test]
    fn assistant_turn_with_thinking_and_tool_use() {
        let msg = parse(
            r#"{"type":"assistant","session_id":"s1","message":{"id":"m","role":"assistant","content":[
                {"type":"thinking","thinking":"hmm","signature":"x"},
                {"type":"text","text":"Starting "},
                {"type":"tool_use","id":"tu_1","name":"Bash","input":{"command":"./init.sh"}},
                {"type":"text","text":"the server."}]}}"#,
        );
        let Message::Assistant(a) = msg else {
            panic!("expected assistant")
        };
        assert_eq!(a.text(), "Starting the server.");
        assert!(matches!(a.message.content[0], ContentBlock::Other));
        assert!(matches!(
            &a.message.content[2],
            ContentBlock::ToolUse { name, input, .. } if name == "Bash" && input["command"] == "./init.sh"
        ));
    }

    #[test]
    fn user_tool_results_in_both_shapes() {
        let plain = parse(
            r#"{"type":"user","session_id":"s1","message":{"role":"user","content":[
                {"type":"tool_result","tool_use_id":"tu_9","content":"Command 'wget' is not allowed","is_error":true}]}}"#,
        );
        let Message::User(u) = plain else {
            panic!("expected user")
        };
        let UserBlock::ToolResult { content, is_error, .. } = &u.message.content.blocks()[0] else {
            panic!("expected tool result")
        };
        assert!(*is_error);
        assert_eq!(content.as_ref().unwrap().text(), "Command 'wget' is not allowed");

        let blocks = parse(
            r#"{"type":"user","session_id":"s1","message":{"content":[
                {"type":"tool_result","tool_use_id":"tu_1","content":[{"type":"text","text":"one"},{"type":"text","text":"two"}]}]}}"#,
        );
        let Message::User(u) = blocks else {
            panic!("expected user")
        };
        let UserBlock::ToolResult { content, is_error, .. } = &u.message.content.blocks()[0] else {
            panic!("expected tool result")
        };
        assert!(!*is_error);
        assert_eq!(content.as_ref().unwrap().text(), "one\ntwo");
    }

    #[test]
    fn echoed_prompt_string_has_no_blocks() {
        let msg = parse(r#"{"type":"user","session_id":"s1","message":{"role":"user","content":"hi"}}"#);
        let Message::User(u) = msg else {
            panic!("expected user")
        };
        assert!(u.message.content.blocks().is_empty());
    }

    #[test]
    fn result_subtypes() {
        let ok = parse(
            r#"{"type":"result","subtype":"success","session_id":"s1","result":"F003 passes","is_error":false,"num_turns":3,"total_cost_usd":0.0042,"duration_ms":5000,"usage":{"input_tokens":1}}"#,
        );
        let Message::Result(r) = ok else {
            panic!("expected result")
        };
        assert_eq!(r.subtype, ResultSubtype::Success);
        assert_eq!(r.result.as_deref(), Some("F003 passes"));
        assert_eq!(r.num_turns, 3);

        let turns = parse(
            r#"{"type":"result","subtype":"error_max_turns","session_id":"s1","is_error":true,"num_turns":10,"errors":["Reached maximum turn limit"]}"#,
        );
        let Message::Result(r) = turns else {
            panic!("expected result")
        };
        assert_eq!(r.subtype, ResultSubtype::ErrorMaxTurns);
        assert!(r.result.is_none());
        assert_eq!(r.errors.len(), 1);

        let future = parse(r#"{"type":"result","subtype":"error_new_kind","session_id":"s1"}"#);
        assert!(matches!(future, Message::Result(r) if r.subtype == ResultSubtype::Other));
    }
}
