use crate::error::{HarnessError, Result};
use crate::paths;
use std::path::Path;

pub const OPEN_QUESTIONS_HEADING: &str = "## Open Questions";

/// Copy `source` to `app_spec.txt` unless the project already has one.
/// Returns true if copied.
pub fn ensure_app_spec(root: &Path, source: Option<&Path>) -> Result<bool> {
    let dest = paths::app_spec_path(root);
    let Some(source) = source else {
        return Ok(false);
    };
    if dest.exists() {
        tracing::debug!(dest = %dest.display(), "app spec already present, not copying");
        return Ok(false);
    }
    let bytes = std::fs::read(source).map_err(|e| {
        HarnessError::Configuration(format!("cannot read spec {}: {e}", source.display()))
    })?;
    crate::io::atomic_write(&dest, &bytes)?;
    tracing::info!(from = %source.display(), "copied app spec into project");
    Ok(true)
}

/// Missing or whitespace-only `app_spec.txt`.
pub fn spec_is_empty(root: &Path) -> Result<bool> {
    Ok(match crate::io::read_optional(&paths::app_spec_path(root))? {
        Some(bytes) => String::from_utf8_lossy(&bytes).trim().is_empty(),
        None => true,
    })
}

fn has_open_questions(text: &str) -> bool {
    text.lines()
        .any(|l| l.trim().eq_ignore_ascii_case(OPEN_QUESTIONS_HEADING))
}

/// Draft written when there is no description to refine.
pub fn write_skeleton(root: &Path) -> Result<()> {
    let text = format!(
        "# Requirements\n\n\
         No application description was provided in `{spec}`.\n\n\
         ## Overview\n\n_TBD_\n\n\
         ## Functional requirements\n\n_TBD_\n\n\
         {OPEN_QUESTIONS_HEADING}\n\n\
         - What application should be built? Describe it in `{spec}` or edit this document directly.\n\
         - Who are the users and what are the key workflows?\n\
         - Are there technology constraints (language, framework, hosting)?\n",
        spec = paths::APP_SPEC_FILE,
    );
    crate::io::atomic_write(&paths::requirements_path(root), text.as_bytes())
}

/// Append an Open Questions section if the draft lacks one. Returns true if
/// the draft was changed.
pub fn ensure_open_questions(root: &Path) -> Result<bool> {
    let path = paths::requirements_path(root);
    let text = std::fs::read_to_string(&path)?;
    if has_open_questions(&text) {
        return Ok(false);
    }
    let sep = if text.ends_with('\n') { "\n" } else { "\n\n" };
    crate::io::append_text(
        &path,
        &format!("{sep}{OPEN_QUESTIONS_HEADING}\n\n- None recorded. Add questions for the reviewer here.\n"),
    )?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn skeleton_has_open_questions() {
        let dir = TempDir::new().unwrap();
        write_skeleton(dir.path()).unwrap();
        let text = std::fs::read_to_string(paths::requirements_path(dir.path())).unwrap();
        assert!(has_open_questions(&text));
        assert!(!ensure_open_questions(dir.path()).unwrap());
    }

    #[test]
    fn open_questions_appended_once() {
        let dir = TempDir::new().unwrap();
        let path = paths::requirements_path(dir.path());
        std::fs::write(&path, "# Requirements\n\n- todo app").unwrap();
        assert!(ensure_open_questions(dir.path()).unwrap());
        assert!(!ensure_open_questions(dir.path()).unwrap());
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches(OPEN_QUESTIONS_HEADING).count(), 1);
        assert!(text.starts_with("# Requirements\n\n- todo app\n\n## Open Questions"));
    }

    #[test]
    fn spec_emptiness() {
        let dir = TempDir::new().unwrap();
        assert!(spec_is_empty(dir.path()).unwrap());
        std::fs::write(paths::app_spec_path(dir.path()), "  \n\t").unwrap();
        assert!(spec_is_empty(dir.path()).unwrap());
        std::fs::write(paths::app_spec_path(dir.path()), "A todo app").unwrap();
        assert!(!spec_is_empty(dir.path()).unwrap());
    }

    #[test]
    fn app_spec_copied_only_when_absent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("idea.txt");
        std::fs::write(&src, "A kanban board").unwrap();
        assert!(ensure_app_spec(dir.path(), Some(&src)).unwrap());
        std::fs::write(&src, "Something else").unwrap();
        assert!(!ensure_app_spec(dir.path(), Some(&src)).unwrap());
        let text = std::fs::read_to_string(paths::app_spec_path(dir.path())).unwrap();
        assert_eq!(text, "A kanban board");
    }

    #[test]
    fn unreadable_spec_source_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.txt");
        assert!(matches!(
            ensure_app_spec(dir.path(), Some(&missing)),
            Err(HarnessError::Configuration(_))
        ));
    }
}
