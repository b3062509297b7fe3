use crate::error::{HarnessError, Result};
use crate::paths;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Harness files that must never be committed.
const IGNORED: &[&str] = &[paths::LOCK_FILE, paths::JOURNAL_FILE];

/// Records project state in git after validated checklist changes.
///
/// A missing `git` binary disables recording with a warning instead of
/// failing the run.
pub struct GitRecorder {
    root: PathBuf,
    bin: Option<PathBuf>,
}

impl GitRecorder {
    pub fn new(root: &Path) -> Self {
        let bin = which::which("git").ok();
        if bin.is_none() {
            tracing::warn!("git not found on PATH; commits are disabled");
        }
        Self {
            root: root.to_path_buf(),
            bin,
        }
    }

    pub fn is_available(&self) -> bool {
        self.bin.is_some()
    }

    fn git(&self, args: &[&str]) -> Result<Option<String>> {
        let Some(bin) = &self.bin else {
            return Ok(None);
        };
        let output = Command::new(bin)
            .args(args)
            .current_dir(&self.root)
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarnessError::ExternalService(format!(
                "git {}: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    /// `git init` when the project has no repository yet. Returns true if a
    /// repository was created.
    pub fn ensure_repo(&self) -> Result<bool> {
        for entry in IGNORED {
            crate::io::ensure_gitignore_entry(&self.root, entry)?;
        }
        if !self.is_available() || self.root.join(".git").exists() {
            return Ok(false);
        }
        self.git(&["init", "--quiet"])?;
        tracing::info!(root = %self.root.display(), "initialized git repository");
        Ok(true)
    }

    fn has_identity(&self) -> bool {
        matches!(self.git(&["config", "user.email"]), Ok(Some(s)) if !s.trim().is_empty())
    }

    /// Stage everything and commit. Returns false when there was nothing to
    /// commit or git is unavailable.
    pub fn commit_all(&self, message: &str) -> Result<bool> {
        let Some(status) = self.git(&["status", "--porcelain"])? else {
            return Ok(false);
        };
        if status.trim().is_empty() {
            return Ok(false);
        }
        self.git(&["add", "-A"])?;
        if self.has_identity() {
            self.git(&["commit", "--quiet", "-m", message])?;
        } else {
            self.git(&[
                "-c",
                "user.name=longrun",
                "-c",
                "user.email=longrun@localhost",
                "commit",
                "--quiet",
                "-m",
                message,
            ])?;
        }
        tracing::info!(%message, "committed");
        Ok(true)
    }

    pub fn commit_count(&self) -> Result<usize> {
        match self.git(&["rev-list", "--count", "HEAD"]) {
            Ok(Some(out)) => Ok(out.trim().parse().unwrap_or(0)),
            Ok(None) => Ok(0),
            // No HEAD yet.
            Err(HarnessError::ExternalService(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_then_commit_only_when_dirty() {
        let dir = TempDir::new().unwrap();
        let git = GitRecorder::new(dir.path());
        if !git.is_available() {
            return;
        }
        assert!(git.ensure_repo().unwrap());
        assert!(!git.ensure_repo().unwrap());

        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        assert!(git.commit_all("initial").unwrap());
        assert!(!git.commit_all("nothing changed").unwrap());
        assert_eq!(git.commit_count().unwrap(), 1);
    }

    #[test]
    fn harness_state_is_ignored() {
        let dir = TempDir::new().unwrap();
        GitRecorder::new(dir.path()).ensure_repo().unwrap();
        let ignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(ignore.lines().any(|l| l == ".longrun/lock"));
        assert!(ignore.lines().any(|l| l == ".longrun/checklist.journal.json"));
    }
}
