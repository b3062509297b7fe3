use std::path::{Path, PathBuf};

/// Resolve the project directory.
///
/// Priority:
/// 1. `--project-dir` flag / `LONGRUN_PROJECT_DIR` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.longrun/`
/// 3. Fall back to `cwd`
pub fn resolve_project_dir(explicit: Option<&Path>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Some(p) = explicit {
        return if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) };
    }

    let mut dir = cwd.clone();
    loop {
        if dir.join(longrun_core::paths::HARNESS_DIR).is_dir() {
            return dir;
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => break,
        }
    }

    cwd
}
