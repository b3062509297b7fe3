use crate::checklist::{ChecklistCounts, Violation};
use crate::error::Result;
use crate::paths;
use crate::session::Phase;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};

const ENTRY_PREFIX: &str = "## Session ";
const NEXT_STEP_HEADING: &str = "### Next step";

/// What happened in one session, as recorded in the progress log.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: u32,
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
    pub outcome: String,
    pub attempted: Option<String>,
    pub completed: Vec<String>,
    pub commands_run: usize,
    pub commands_denied: usize,
    pub errors: Vec<String>,
    pub violations: Vec<Violation>,
    pub counts: ChecklistCounts,
    pub summary: String,
    pub next_step: String,
}

impl SessionReport {
    pub fn render(&self) -> String {
        let list = |items: &[String]| {
            if items.is_empty() {
                "none".to_string()
            } else {
                items.join(", ")
            }
        };
        let mut out = format!(
            "{ENTRY_PREFIX}{} · {} · {}\n",
            self.session,
            self.phase,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        out.push_str(&format!("- outcome: {}\n", self.outcome));
        out.push_str(&format!(
            "- attempted: {}\n",
            self.attempted.as_deref().unwrap_or("-")
        ));
        out.push_str(&format!("- completed: {}\n", list(&self.completed)));
        out.push_str(&format!(
            "- commands: {} run, {} denied\n",
            self.commands_run, self.commands_denied
        ));
        out.push_str(&format!("- errors: {}\n", list(&self.errors)));
        if !self.violations.is_empty() {
            let v: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
            out.push_str(&format!("- violations: {}\n", v.join("; ")));
        }
        out.push_str(&format!(
            "- checklist: {}/{} passing\n",
            self.counts.passing, self.counts.total
        ));
        let summary = escape_headings(self.summary.trim());
        if !summary.is_empty() {
            out.push('\n');
            out.push_str(&summary);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(NEXT_STEP_HEADING);
        out.push('\n');
        out.push_str(&escape_headings(self.next_step.trim()));
        out.push_str("\n\n");
        out
    }
}

/// Agent text must not open a new entry or section when it is embedded.
fn escape_headings(text: &str) -> String {
    text.lines()
        .map(|l| {
            if l.starts_with('#') {
                format!("\\{l}")
            } else {
                l.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Append-only session log in `longrun-progress.md`. Advisory; the checklist
/// stays the source of truth.
pub struct ProgressTracker {
    path: PathBuf,
}

impl ProgressTracker {
    pub fn new(root: &Path) -> Self {
        Self {
            path: paths::progress_path(root),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, report: &SessionReport) -> Result<()> {
        let mut text = String::new();
        if !self.path.exists() {
            text.push_str("# Progress\n\n");
        }
        text.push_str(&report.render());
        crate::io::append_text(&self.path, &text)?;
        tracing::debug!(session = report.session, phase = %report.phase, "progress entry appended");
        Ok(())
    }

    fn read(&self) -> Result<String> {
        Ok(crate::io::read_optional(&self.path)?
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default())
    }

    pub fn session_count(&self) -> Result<u32> {
        let count = self
            .read()?
            .lines()
            .filter(|l| l.starts_with(ENTRY_PREFIX))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    pub fn next_session_number(&self) -> Result<u32> {
        Ok(self.session_count()?.saturating_add(1))
    }

    /// Body of the `### Next step` section of the last entry.
    pub fn last_recommended_action(&self) -> Result<Option<String>> {
        Ok(parse_last_next_step(&self.read()?))
    }
}

fn parse_last_next_step(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.iter().rposition(|l| l.starts_with(ENTRY_PREFIX))?;
    let entry = &lines[start + 1..];
    let heading = entry.iter().position(|l| l.trim_end() == NEXT_STEP_HEADING)?;
    let body: Vec<&str> = entry[heading + 1..]
        .iter()
        .take_while(|l| !l.starts_with("## ") && !l.starts_with("### "))
        .copied()
        .collect();
    let body = body.join("\n").trim().to_string();
    (!body.is_empty()).then_some(body)
}
