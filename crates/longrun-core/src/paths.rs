use std::path::{Path, PathBuf};

// Project artifacts, named in the prompts.
pub const APP_SPEC_FILE: &str = "app_spec.txt";
pub const REQUIREMENTS_FILE: &str = "refined_requirements.md";
pub const CHECKLIST_FILE: &str = "feature_list.json";
pub const PROGRESS_FILE: &str = "longrun-progress.md";
pub const INIT_SCRIPT: &str = "init.sh";

// Harness-owned state.
pub const HARNESS_DIR: &str = ".longrun";
pub const CONFIG_FILE: &str = ".longrun/config.yaml";
pub const APPROVAL_FILE: &str = ".longrun/approval.yaml";
pub const LOCK_FILE: &str = ".longrun/lock";
pub const JOURNAL_FILE: &str = ".longrun/checklist.journal.json";
pub const PENDING_CHECKLIST_FILE: &str = ".longrun/feature_list.pending.json";
pub const REJECTED_CHECKLIST_FILE: &str = ".longrun/feature_list.rejected.json";
pub const PROMPTS_DIR: &str = ".longrun/prompts";
pub const CLAUDE_SETTINGS_FILE: &str = ".longrun/claude-settings.json";

pub fn app_spec_path(root: &Path) -> PathBuf {
    root.join(APP_SPEC_FILE)
}

pub fn requirements_path(root: &Path) -> PathBuf {
    root.join(REQUIREMENTS_FILE)
}

pub fn checklist_path(root: &Path) -> PathBuf {
    root.join(CHECKLIST_FILE)
}

pub fn progress_path(root: &Path) -> PathBuf {
    root.join(PROGRESS_FILE)
}

pub fn init_script_path(root: &Path) -> PathBuf {
    root.join(INIT_SCRIPT)
}

pub fn harness_dir(root: &Path) -> PathBuf {
    root.join(HARNESS_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn approval_path(root: &Path) -> PathBuf {
    root.join(APPROVAL_FILE)
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

pub fn journal_path(root: &Path) -> PathBuf {
    root.join(JOURNAL_FILE)
}

pub fn pending_checklist_path(root: &Path) -> PathBuf {
    root.join(PENDING_CHECKLIST_FILE)
}

pub fn rejected_checklist_path(root: &Path) -> PathBuf {
    root.join(REJECTED_CHECKLIST_FILE)
}

pub fn prompt_override_path(root: &Path, name: &str) -> PathBuf {
    root.join(PROMPTS_DIR).join(format!("{name}.md"))
}

pub fn claude_settings_path(root: &Path) -> PathBuf {
    root.join(CLAUDE_SETTINGS_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            checklist_path(root),
            PathBuf::from("/tmp/proj/feature_list.json")
        );
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.longrun/config.yaml")
        );
        assert_eq!(
            prompt_override_path(root, "coding"),
            PathBuf::from("/tmp/proj/.longrun/prompts/coding.md")
        );
    }
}
