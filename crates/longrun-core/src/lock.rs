//! Single-writer lock on a project directory.
//!
//! `.longrun/lock` is held with an exclusive advisory OS lock for the whole
//! invocation and carries JSON metadata about the holder. The OS drops the
//! lock when the process dies, so a killed run never leaves a stale lock.

use crate::error::{HarnessError, Result};
use crate::paths;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    pub host: String,
    #[serde(default)]
    pub user: String,
    pub started_at: DateTime<Utc>,
    pub run_id: String,
}

impl LockMetadata {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            user: whoami::username(),
            started_at: Utc::now(),
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn display_summary(&self) -> String {
        let age = Utc::now().signed_duration_since(self.started_at);
        let age_str = if age.num_hours() > 0 {
            format!("{}h {}m ago", age.num_hours(), age.num_minutes() % 60)
        } else if age.num_minutes() > 0 {
            format!("{}m {}s ago", age.num_minutes(), age.num_seconds() % 60)
        } else {
            format!("{}s ago", age.num_seconds())
        };
        format!(
            "PID {} ({}@{}) started {} (run {})",
            self.pid, self.user, self.host, age_str, self.run_id
        )
    }
}

/// A held project lock. Released on drop.
#[derive(Debug)]
pub struct ProjectLock {
    file: File,
    path: PathBuf,
    metadata: LockMetadata,
}

impl ProjectLock {
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = paths::lock_path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            let mut raw = String::new();
            file.read_to_string(&mut raw)?;
            let holder = serde_json::from_str::<LockMetadata>(&raw)
                .map(|m| m.display_summary())
                .unwrap_or_else(|_| "unknown holder".to_string());
            return Err(HarnessError::Locked(holder));
        }

        let metadata = LockMetadata::current();
        let json = serde_json::to_string_pretty(&metadata)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        tracing::debug!(path = %path.display(), run_id = %metadata.run_id, "project lock acquired");

        Ok(Self {
            file,
            path,
            metadata,
        })
    }

    pub fn metadata(&self) -> &LockMetadata {
        &self.metadata
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
        tracing::debug!(path = %self.path.display(), "project lock released");
    }
}
