use crate::error::{HarnessError, Result};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// A human sign-off on one exact version of the requirements draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub approved_at: DateTime<Utc>,
    pub approved_by: String,
    pub requirements_sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    /// Recorded, but the draft changed since.
    Stale,
    Missing,
}

fn digest_requirements(root: &Path) -> Result<String> {
    let path = paths::requirements_path(root);
    let bytes = std::fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            HarnessError::NotFound(path.display().to_string())
        } else {
            HarnessError::Io(e)
        }
    })?;
    let hash = Sha256::digest(&bytes);
    Ok(hash.iter().map(|b| format!("{b:02x}")).collect())
}

/// Persist approval of the current draft.
pub fn record(root: &Path, approved_by: &str) -> Result<Approval> {
    let approval = Approval {
        approved_at: Utc::now(),
        approved_by: approved_by.to_string(),
        requirements_sha256: digest_requirements(root)?,
    };
    let data = serde_yaml::to_string(&approval)?;
    crate::io::atomic_write(&paths::approval_path(root), data.as_bytes())?;
    tracing::info!(by = approved_by, hash = %approval.requirements_sha256, "requirements approved");
    Ok(approval)
}

pub fn load(root: &Path) -> Result<Option<Approval>> {
    match crate::io::read_optional(&paths::approval_path(root))? {
        Some(bytes) => Ok(Some(serde_yaml::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub fn status(root: &Path) -> Result<ApprovalStatus> {
    let Some(approval) = load(root)? else {
        return Ok(ApprovalStatus::Missing);
    };
    if !paths::requirements_path(root).exists() {
        return Ok(ApprovalStatus::Stale);
    }
    if digest_requirements(root)? == approval.requirements_sha256 {
        Ok(ApprovalStatus::Approved)
    } else {
        Ok(ApprovalStatus::Stale)
    }
}

/// Best-effort name for `approved_by`.
pub fn current_user() -> String {
    whoami::username()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn with_draft(text: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(paths::requirements_path(dir.path()), text).unwrap();
        dir
    }

    #[test]
    fn missing_until_recorded() {
        let dir = with_draft("# Requirements\n");
        assert_eq!(status(dir.path()).unwrap(), ApprovalStatus::Missing);
        let a = record(dir.path(), "reviewer").unwrap();
        assert_eq!(a.requirements_sha256.len(), 64);
        assert_eq!(status(dir.path()).unwrap(), ApprovalStatus::Approved);
        assert_eq!(load(dir.path()).unwrap().unwrap(), a);
    }

    #[test]
    fn editing_the_draft_makes_approval_stale() {
        let dir = with_draft("# Requirements\n");
        record(dir.path(), "reviewer").unwrap();
        std::fs::write(paths::requirements_path(dir.path()), "# Requirements v2\n").unwrap();
        assert_eq!(status(dir.path()).unwrap(), ApprovalStatus::Stale);
    }

    #[test]
    fn record_without_draft_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            record(dir.path(), "x"),
            Err(HarnessError::NotFound(_))
        ));
    }
}
