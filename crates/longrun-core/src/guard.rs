//! Allow-list evaluation for shell commands an agent proposes.
//!
//! A command line is split into segments on `&&`, `||`, `;`, `|` and
//! newlines (outside quotes). Every segment must name an allow-listed
//! program, and a handful of programs get argument-level checks on top.

use crate::error::{HarnessError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Programs that reach the network. Blocked unless `allow_network` is set.
pub const NETWORK_COMMANDS: &[&str] = &[
    "curl", "wget", "ssh", "scp", "nc", "rsync", "ftp", "telnet",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardPolicy {
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub denied_patterns: Vec<String>,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default = "default_pkill_targets")]
    pub pkill_targets: Vec<String>,
}

fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "wc", "grep", "cp", "mkdir", "chmod", "pwd", "npm", "node",
        "git", "ps", "lsof", "sleep", "pkill", "init.sh",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_pkill_targets() -> Vec<String> {
    ["node", "npm", "npx", "vite", "next"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            denied_patterns: Vec::new(),
            allow_network: false,
            pkill_targets: default_pkill_targets(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny { reason: String },
}

impl Verdict {
    fn deny(reason: impl Into<String>) -> Self {
        Verdict::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Allow => None,
            Verdict::Deny { reason } => Some(reason),
        }
    }

    /// `CommandDenied` for a deny verdict.
    pub fn into_result(self, command: &str) -> Result<()> {
        match self {
            Verdict::Allow => Ok(()),
            Verdict::Deny { reason } => Err(HarnessError::CommandDenied {
                command: command.to_string(),
                reason,
            }),
        }
    }
}

/// Decides whether a shell command may run. Injected into session clients.
pub trait CommandPolicy: Send + Sync {
    fn evaluate(&self, command: &str) -> Verdict;
}

#[derive(Debug)]
pub struct CommandGuard {
    policy: GuardPolicy,
    allowed: Vec<Vec<String>>,
    denied: Vec<Regex>,
}

impl CommandGuard {
    pub fn new(policy: GuardPolicy) -> Result<Self> {
        let denied = policy
            .denied_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    HarnessError::Configuration(format!("invalid denied pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let allowed = policy
            .allowed_commands
            .iter()
            .map(|entry| entry.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|words| !words.is_empty())
            .collect();
        Ok(Self {
            policy,
            allowed,
            denied,
        })
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    fn check_segment(&self, segment: &str) -> Verdict {
        for re in &self.denied {
            if re.is_match(segment) {
                return Verdict::deny(format!("'{segment}' matches denied pattern '{re}'"));
            }
        }

        let Some(tokens) = shlex::split(segment) else {
            return Verdict::deny(format!("could not parse command segment: {segment}"));
        };
        let words = strip_env_assignments(&tokens);
        let Some(first) = words.first() else {
            return Verdict::deny(format!("no command found in segment: {segment}"));
        };
        let name = program_name(first);

        if !self.policy.allow_network && NETWORK_COMMANDS.contains(&name) {
            return Verdict::deny(format!("Command '{name}' needs network access, which is disabled"));
        }

        if !self.is_listed(name, &words[1..]) {
            return Verdict::deny(format!(
                "Command '{name}' is not in the allowed commands list"
            ));
        }

        match name {
            "pkill" => self.check_pkill(&words[1..]),
            "chmod" => check_chmod(&words[1..]),
            "init.sh" => check_init_script(first),
            _ => Verdict::Allow,
        }
    }

    fn is_listed(&self, name: &str, args: &[String]) -> bool {
        self.allowed.iter().any(|entry| {
            entry[0] == name
                && entry.len() - 1 <= args.len()
                && entry[1..].iter().zip(args).all(|(want, got)| want == got)
        })
    }

    fn check_pkill(&self, args: &[String]) -> Verdict {
        let targets: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
        let Some(last) = targets.last() else {
            return Verdict::deny("pkill requires a process name");
        };
        // `pkill -f "node server.js"` targets by the first word.
        let target = last.split_whitespace().next().unwrap_or("");
        if self.policy.pkill_targets.iter().any(|t| t == target) {
            Verdict::Allow
        } else {
            Verdict::deny(format!(
                "pkill only allowed for dev processes: {}",
                self.policy.pkill_targets.join(", ")
            ))
        }
    }
}

impl CommandPolicy for CommandGuard {
    fn evaluate(&self, command: &str) -> Verdict {
        let command = command.trim();
        if command.is_empty() {
            return Verdict::deny("empty command");
        }
        for re in &self.denied {
            if re.is_match(command) {
                return Verdict::deny(format!("command matches denied pattern '{re}'"));
            }
        }
        let segments = match split_segments(command) {
            Ok(s) => s,
            Err(reason) => return Verdict::deny(reason),
        };
        if segments.is_empty() {
            return Verdict::deny("no command found");
        }
        for segment in &segments {
            let verdict = self.check_segment(segment);
            if !verdict.is_allowed() {
                tracing::debug!(%command, %segment, reason = ?verdict.reason(), "command denied");
                return verdict;
            }
        }
        Verdict::Allow
    }
}

fn check_chmod(args: &[String]) -> Verdict {
    if args.iter().any(|a| a.starts_with('-')) {
        return Verdict::deny("chmod flags are not allowed");
    }
    let Some((mode, files)) = args.split_first() else {
        return Verdict::deny("chmod requires a mode");
    };
    if files.is_empty() {
        return Verdict::deny("chmod requires at least one file");
    }
    let valid = mode
        .strip_suffix("+x")
        .is_some_and(|who| who.chars().all(|c| matches!(c, 'u' | 'g' | 'o' | 'a')));
    if valid {
        Verdict::Allow
    } else {
        Verdict::deny(format!("chmod only allowed with +x mode, got: {mode}"))
    }
}

fn check_init_script(invocation: &str) -> Verdict {
    if invocation == "./init.sh" || invocation.ends_with("/init.sh") {
        Verdict::Allow
    } else {
        Verdict::deny(format!("Only ./init.sh is allowed, got: {invocation}"))
    }
}

/// Basename of the program, so `/usr/bin/git` and `git` are the same command.
fn program_name(word: &str) -> &str {
    Path::new(word)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(word)
}

/// Drop leading `VAR=value` words.
fn strip_env_assignments(tokens: &[String]) -> &[String] {
    let skip = tokens
        .iter()
        .take_while(|t| {
            t.split_once('=').is_some_and(|(k, _)| {
                !k.is_empty() && k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            })
        })
        .count();
    &tokens[skip..]
}

/// Split on shell control operators outside quotes.
///
/// Command and process substitution are refused: the substituted program
/// would escape the allow-list.
fn split_segments(command: &str) -> std::result::Result<Vec<String>, String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut single = false;
    let mut double = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' if !single => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if !double => {
                single = !single;
                current.push(c);
            }
            '"' if !single => {
                double = !double;
                current.push(c);
            }
            '`' if !single => return Err("command substitution is not allowed".into()),
            '$' if !single && chars.peek() == Some(&'(') => {
                return Err("command substitution is not allowed".into())
            }
            '<' | '>' if !single && chars.peek() == Some(&'(') => {
                return Err("process substitution is not allowed".into())
            }
            ';' | '\n' if !single && !double => push_segment(&mut segments, &mut current),
            '&' if !single && !double => {
                if chars.peek() == Some(&'&') {
                    chars.next();
                    push_segment(&mut segments, &mut current);
                } else {
                    return Err("background execution is not allowed".into());
                }
            }
            '|' if !single && !double => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                push_segment(&mut segments, &mut current);
            }
            _ => current.push(c),
        }
    }
    if single || double {
        return Err(format!("could not parse command (unbalanced quotes): {command}"));
    }
    push_segment(&mut segments, &mut current);
    Ok(segments)
}

fn push_segment(segments: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> CommandGuard {
        CommandGuard::new(GuardPolicy::default()).unwrap()
    }

    fn allowed(cmd: &str) -> bool {
        guard().evaluate(cmd).is_allowed()
    }

    #[test]
    fn allow_listed_commands_pass() {
        for cmd in [
            "ls -la",
            "cat package.json",
            "npm install",
            "npm run dev",
            "git status",
            "git commit -m \"feat: add login; and more\"",
            "/usr/bin/git log --oneline",
            "ps aux | grep node",
            "mkdir -p src/components && cp a.txt src/",
            "sleep 2; tail -n 20 server.log",
            "NODE_ENV=test node server.js",
        ] {
            assert!(allowed(cmd), "expected allow: {cmd}");
        }
    }

    #[test]
    fn unlisted_commands_are_denied_with_reason() {
        let v = guard().evaluate("rm -rf /");
        assert_eq!(
            v.reason(),
            Some("Command 'rm' is not in the allowed commands list")
        );
        assert!(!allowed("python -c 'print(1)'"));
        assert!(!allowed("ls && rm -rf node_modules"));
        assert!(!allowed("cat file | sh"));
    }

    #[test]
    fn network_commands_blocked_unless_enabled() {
        let v = guard().evaluate("curl https://example.com");
        assert!(v.reason().unwrap().contains("network"));

        let policy = GuardPolicy {
            allow_network: true,
            allowed_commands: vec!["curl".into()],
            ..GuardPolicy::default()
        };
        let g = CommandGuard::new(policy).unwrap();
        assert!(g.evaluate("curl -s http://localhost:3000").is_allowed());
    }

    #[test]
    fn denied_patterns_win_over_allow_list() {
        let policy = GuardPolicy {
            denied_patterns: vec![r"git\s+push".into(), r"--force".into()],
            ..GuardPolicy::default()
        };
        let g = CommandGuard::new(policy).unwrap();
        assert!(!g.evaluate("git push origin main").is_allowed());
        assert!(!g.evaluate("git status && git checkout --force main").is_allowed());
        assert!(g.evaluate("git add -A").is_allowed());
    }

    #[test]
    fn invalid_pattern_is_a_configuration_error() {
        let policy = GuardPolicy {
            denied_patterns: vec!["(".into()],
            ..GuardPolicy::default()
        };
        assert!(matches!(
            CommandGuard::new(policy),
            Err(HarnessError::Configuration(_))
        ));
    }

    #[test]
    fn pkill_only_dev_processes() {
        assert!(allowed("pkill node"));
        assert!(allowed("pkill -f \"vite --port 5173\""));
        assert!(!allowed("pkill bash"));
        assert!(!allowed("pkill"));
    }

    #[test]
    fn chmod_only_plus_x() {
        assert!(allowed("chmod +x init.sh"));
        assert!(allowed("chmod u+x scripts/a.sh scripts/b.sh"));
        assert!(!allowed("chmod 777 init.sh"));
        assert!(!allowed("chmod -R +x ."));
        assert!(!allowed("chmod +x"));
    }

    #[test]
    fn init_script_only_by_path() {
        assert!(allowed("./init.sh"));
        assert!(allowed("/home/dev/project/init.sh"));
        assert!(!allowed("init.sh"));
    }

    #[test]
    fn malformed_input_fails_closed() {
        assert!(!allowed("cat 'unterminated"));
        assert!(!allowed(""));
        assert!(!allowed("echo `whoami`"));
        assert!(!allowed("ls $(rm -rf /)"));
        assert!(!allowed("node server.js &"));
        assert!(!allowed("cat <(rm -rf /tmp/x)"));
        assert!(!allowed("ls > >(rm -rf /tmp/x)"));
        assert!(!allowed("cat \"<(rm -rf /tmp/x)\""));
        assert!(allowed("grep '<(' notes.txt"));
    }

    #[test]
    fn multi_word_entries_match_as_prefixes() {
        let policy = GuardPolicy {
            allowed_commands: vec!["npx playwright".into()],
            ..GuardPolicy::default()
        };
        let g = CommandGuard::new(policy).unwrap();
        assert!(g.evaluate("npx playwright test").is_allowed());
        assert!(!g.evaluate("npx create-react-app x").is_allowed());
    }

    #[test]
    fn deny_verdict_maps_to_command_denied() {
        let err = guard().evaluate("wget x").into_result("wget x").unwrap_err();
        assert!(matches!(err, HarnessError::CommandDenied { ref command, .. } if command == "wget x"));
    }

    #[test]
    fn policy_yaml_defaults() {
        let p: GuardPolicy = serde_yaml::from_str("allow_network: true\n").unwrap();
        assert!(p.allow_network);
        assert!(p.allowed_commands.contains(&"git".to_string()));
        assert_eq!(p.pkill_targets.len(), 5);
    }
}
