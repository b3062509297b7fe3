use crate::error::{HarnessError, Result};
use crate::guard::{GuardPolicy, NETWORK_COMMANDS};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Per-session bounds handed to the agent CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
}

fn default_max_turns() -> u32 {
    1000
}

fn default_timeout_minutes() -> u32 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            timeout_minutes: default_timeout_minutes(),
            max_budget_usd: None,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_minutes) * 60)
    }
}

// ---------------------------------------------------------------------------
// CodingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingConfig {
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_auto_continue_delay")]
    pub auto_continue_delay_secs: u64,
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_auto_continue_delay() -> u64 {
    3
}

impl Default for CodingConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            auto_continue_delay_secs: default_auto_continue_delay(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub coding: CodingConfig,
    #[serde(default)]
    pub policy: GuardPolicy,
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
}

fn default_version() -> u32 {
    1
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_allowed_tools() -> Vec<String> {
    ["Read", "Write", "Edit", "Glob", "Grep", "Bash"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            model: default_model(),
            session: SessionConfig::default(),
            coding: CodingConfig::default(),
            policy: GuardPolicy::default(),
            allowed_tools: default_allowed_tools(),
        }
    }
}

impl Config {
    /// Load `.longrun/config.yaml`, or defaults when the file is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        let Some(bytes) = crate::io::read_optional(&path)? else {
            return Ok(Self::default());
        };
        serde_yaml::from_slice(&bytes).map_err(|e| {
            HarnessError::Configuration(format!("{}: {e}", path.display()))
        })
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for pattern in &self.policy.denied_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("policy.denied_patterns: '{pattern}' is not a valid regex: {e}"),
                });
            }
        }

        if self.session.timeout_minutes == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "session.timeout_minutes is 0; every session would time out immediately"
                    .to_string(),
            });
        }

        if self.session.max_turns == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "session.max_turns is 0".to_string(),
            });
        }

        if self.coding.max_consecutive_failures == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "coding.max_consecutive_failures is 0; the first service error stops the run"
                    .to_string(),
            });
        }

        if !self.policy.allow_network {
            for cmd in &self.policy.allowed_commands {
                let name = cmd.split_whitespace().next().unwrap_or("");
                if NETWORK_COMMANDS.contains(&name) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "'{name}' is allow-listed but policy.allow_network is false; it will still be blocked"
                        ),
                    });
                }
            }
        }

        if !self.allowed_tools.iter().any(|t| t == "Bash") {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "allowed_tools does not include Bash; the agent cannot run init.sh or git"
                    .to_string(),
            });
        }

        if self.model.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "model is empty".to_string(),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.coding.max_consecutive_failures, 3);
        assert_eq!(cfg.coding.auto_continue_delay_secs, 3);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.model = "claude-opus-4-1".into();
        cfg.session.max_turns = 50;
        cfg.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), cfg);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "session:\n  timeout_minutes: 5\npolicy:\n  allow_network: true\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.session.timeout_minutes, 5);
        assert_eq!(cfg.session.max_turns, 1000);
        assert_eq!(cfg.session.timeout(), Duration::from_secs(300));
        assert!(cfg.policy.allow_network);
        assert!(cfg.policy.allowed_commands.contains(&"npm".to_string()));
    }

    #[test]
    fn validate_default_config_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_bad_regex_is_error() {
        let mut cfg = Config::default();
        cfg.policy.denied_patterns.push("[unclosed".into());
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Error);
        assert!(warnings[0].message.contains("[unclosed"));
    }

    #[test]
    fn validate_network_command_without_network() {
        let mut cfg = Config::default();
        cfg.policy.allowed_commands.push("curl".into());
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.message.contains("'curl'")));
    }

    #[test]
    fn validate_zero_timeout() {
        let mut cfg = Config::default();
        cfg.session.timeout_minutes = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("timeout")));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".longrun")).unwrap();
        std::fs::write(paths::config_path(dir.path()), "session: [1, 2").unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(HarnessError::Configuration(_))
        ));
    }
}
