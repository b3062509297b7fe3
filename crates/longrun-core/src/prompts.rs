use crate::error::Result;
use crate::paths;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptName {
    Requirements,
    Initializer,
    Coding,
    System,
}

impl PromptName {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptName::Requirements => "requirements",
            PromptName::Initializer => "initializer",
            PromptName::Coding => "coding",
            PromptName::System => "system",
        }
    }

    pub fn builtin(self) -> &'static str {
        match self {
            PromptName::Requirements => include_str!("../prompts/requirements.md"),
            PromptName::Initializer => include_str!("../prompts/initializer.md"),
            PromptName::Coding => include_str!("../prompts/coding.md"),
            PromptName::System => include_str!("../prompts/system.md"),
        }
    }

    pub fn all() -> &'static [PromptName] {
        &[
            PromptName::Requirements,
            PromptName::Initializer,
            PromptName::Coding,
            PromptName::System,
        ]
    }
}

/// Template text for `name`: `.longrun/prompts/<name>.md` if present,
/// otherwise the built-in.
pub fn load(root: &Path, name: PromptName) -> Result<String> {
    let path = paths::prompt_override_path(root, name.as_str());
    match crate::io::read_optional(&path)? {
        Some(bytes) => {
            tracing::debug!(path = %path.display(), "using prompt override");
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => Ok(name.builtin().to_string()),
    }
}

/// Replace `{{key}}` occurrences. Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Placeholders every template can use.
pub fn file_vars() -> Vec<(&'static str, &'static str)> {
    vec![
        ("app_spec_file", paths::APP_SPEC_FILE),
        ("requirements_file", paths::REQUIREMENTS_FILE),
        ("checklist_file", paths::CHECKLIST_FILE),
        ("pending_checklist_file", paths::PENDING_CHECKLIST_FILE),
        ("progress_file", paths::PROGRESS_FILE),
    ]
}
