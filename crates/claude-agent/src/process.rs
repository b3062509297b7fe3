use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::types::{Message, PermissionMode, QueryOptions};
use crate::{ClaudeAgentError, Result};

const DEFAULT_EXE: &str = "claude";

/// A running `claude` child speaking stream-json on stdout.
///
/// The child is killed on drop.
pub(crate) struct ClaudeProcess {
    child: Child,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
}

impl ClaudeProcess {
    /// Start `claude` and hand it `prompt` as the single user message.
    pub(crate) async fn spawn(prompt: &str, opts: &QueryOptions) -> Result<Self> {
        let exe = opts.path_to_executable.as_deref().unwrap_or(DEFAULT_EXE);
        let mut cmd = Command::new(exe);
        cmd.args(command_args(opts));
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        // A nested CLI refuses to start when it sees its parent's marker.
        cmd.env_remove("CLAUDECODE");

        let mut process = Self::start(cmd).map_err(|source| ClaudeAgentError::Spawn {
            exe: exe.to_string(),
            source,
        })?;

        let line = serde_json::json!({
            "type": "user",
            "message": { "role": "user", "content": [{ "type": "text", "text": prompt }] }
        });
        let mut payload = serde_json::to_vec(&line)
            .map_err(|e| ClaudeAgentError::Process(format!("cannot encode prompt: {e}")))?;
        payload.push(b'\n');

        let mut stdin = process
            .child
            .stdin
            .take()
            .ok_or_else(|| ClaudeAgentError::Process("stdin not captured".into()))?;
        stdin.write_all(&payload).await?;
        stdin.flush().await?;
        // Closing stdin ends the conversation after this prompt.
        drop(stdin);

        Ok(process)
    }

    /// Run any command in place of the CLI, e.g. `cat` over a fixture.
    #[cfg(test)]
    pub(crate) fn from_command(cmd: Command) -> Result<Self> {
        Ok(Self::start(cmd)?)
    }

    fn start(mut cmd: Command) -> std::io::Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf).await;
                buf
            })
        });

        Ok(Self {
            child,
            stdout: BufReader::new(stdout).lines(),
            stderr,
        })
    }

    /// Next recognised message, or `None` at EOF. Blank lines and lines with
    /// an unknown `"type"` are skipped.
    pub(crate) async fn next_message(&mut self) -> Result<Option<Message>> {
        while let Some(line) = self.stdout.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(_) if has_type_field(line) => {
                    tracing::trace!(%line, "skipping unrecognised stream-json line");
                }
                Err(source) => {
                    return Err(ClaudeAgentError::Parse {
                        line: line.to_string(),
                        source,
                    })
                }
            }
        }
        Ok(None)
    }

    /// Reap the child. `Some` when it failed, with whatever it wrote to stderr.
    pub(crate) async fn exit_error(&mut self) -> Option<ClaudeAgentError> {
        let status = match self.child.wait().await {
            Ok(s) => s,
            Err(e) => return Some(e.into()),
        };
        if status.success() {
            return None;
        }
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let how = match status.code() {
            Some(code) => format!("exited with code {code}"),
            None => "was terminated by a signal".to_string(),
        };
        let stderr = stderr.trim();
        Some(ClaudeAgentError::Process(if stderr.is_empty() {
            format!("claude {how}")
        } else {
            format!("claude {how}\nstderr: {stderr}")
        }))
    }

    pub(crate) async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// Valid JSON with a `"type"` we do not model (`tool_progress`,
/// `rate_limit_event`, ...).
fn has_type_field(line: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(line)
        .map(|v| v.get("type").is_some())
        .unwrap_or(false)
}

/// CLI arguments for `opts`. The prompt is sent on stdin, never as an argument.
pub(crate) fn command_args(opts: &QueryOptions) -> Vec<String> {
    let mut args: Vec<String> = [
        "--output-format",
        "stream-json",
        "--verbose",
        "--input-format",
        "stream-json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let mut flag = |name: &str, value: String| {
        args.push(name.to_string());
        args.push(value);
    };
    if let Some(model) = &opts.model {
        flag("--model", model.clone());
    }
    if let Some(turns) = opts.max_turns {
        flag("--max-turns", turns.to_string());
    }
    if let Some(budget) = opts.max_budget_usd {
        flag("--max-budget-usd", budget.to_string());
    }
    if opts.permission_mode != PermissionMode::Default {
        flag("--permission-mode", opts.permission_mode.as_str().to_string());
    }
    if let Some(system) = &opts.system_prompt {
        flag("--system-prompt", system.clone());
    }
    if let Some(settings) = &opts.settings {
        flag("--settings", settings.display().to_string());
    }

    if !opts.allowed_tools.is_empty() {
        args.push("--allowed-tools".to_string());
        args.extend(opts.allowed_tools.iter().cloned());
    }
    if opts.no_session_persistence {
        args.push("--no-session-persistence".to_string());
    }
    args
}
