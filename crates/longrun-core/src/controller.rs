//! Phase detection and execution.
//!
//! Each invocation inspects the project directory, picks exactly one phase
//! and runs it:
//!
//! - **refine**: draft `refined_requirements.md` from `app_spec.txt`, then stop for review
//! - **initialize**: turn the approved draft into the frozen feature checklist
//! - **code**: attempt pending features one session at a time
//!
//! All state lives on disk, so a killed invocation is resumed by running the
//! same command again.

use crate::approval::{self, ApprovalStatus};
use crate::checklist::{
    Checklist, ChecklistCounts, ChecklistStore, FeatureItem, Journal, Reconciliation, Violation,
};
use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::git::GitRecorder;
use crate::guard::CommandGuard;
use crate::lock::ProjectLock;
use crate::paths;
use crate::progress::{ProgressTracker, SessionReport};
use crate::prompts::{self, PromptName};
use crate::requirements;
use crate::session::{Phase, SessionClient, SessionOutcome, SessionRequest, SessionStatus};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SUMMARY_LIMIT: usize = 2000;

/// The on-disk facts phase selection depends on.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSnapshot {
    pub root: PathBuf,
    pub has_app_spec: bool,
    pub has_requirements: bool,
    pub approval: ApprovalStatus,
    pub checklist: Option<ChecklistCounts>,
    pub journal_pending: bool,
}

impl ProjectSnapshot {
    pub fn capture(root: &Path) -> Result<Self> {
        let store = ChecklistStore::new(root);
        let checklist = if store.exists() {
            Some(store.load()?.counts())
        } else {
            None
        };
        Ok(Self {
            root: root.to_path_buf(),
            has_app_spec: paths::app_spec_path(root).exists(),
            has_requirements: paths::requirements_path(root).exists(),
            approval: approval::status(root)?,
            checklist,
            journal_pending: paths::journal_path(root).exists(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    Refine,
    AwaitApproval,
    Initialize,
    Code,
    Complete,
}

impl fmt::Display for NextStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NextStep::Refine => "refine requirements",
            NextStep::AwaitApproval => "awaiting approval",
            NextStep::Initialize => "initialize checklist",
            NextStep::Code => "code",
            NextStep::Complete => "complete",
        })
    }
}

/// Pure phase selection.
pub fn next_step(snapshot: &ProjectSnapshot, approved_flag: bool) -> NextStep {
    if !snapshot.has_requirements {
        return NextStep::Refine;
    }
    match snapshot.checklist {
        None if approved_flag || snapshot.approval == ApprovalStatus::Approved => {
            NextStep::Initialize
        }
        None => NextStep::AwaitApproval,
        Some(counts) if counts.passing < counts.total => NextStep::Code,
        Some(_) => NextStep::Complete,
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub approved: bool,
    pub max_iterations: Option<u32>,
    pub spec: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    RequirementsDrafted,
    Initialized,
    AllPassed,
    IterationLimit,
    NoAttemptableFeatures,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::RequirementsDrafted => "requirements drafted; review them, then re-run with --approved",
            StopReason::Initialized => "feature checklist created; re-run to start coding",
            StopReason::AllPassed => "all features pass",
            StopReason::IterationLimit => "iteration limit reached",
            StopReason::NoAttemptableFeatures => {
                "every remaining feature was attempted this run without passing"
            }
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub step: NextStep,
    pub stop: StopReason,
    pub sessions: u32,
    pub newly_passed: Vec<String>,
    pub skipped: Vec<String>,
    pub recovered: Vec<String>,
    pub counts: Option<ChecklistCounts>,
}

impl RunReport {
    fn new(step: NextStep, stop: StopReason) -> Self {
        Self {
            step,
            stop,
            sessions: 0,
            newly_passed: Vec::new(),
            skipped: Vec::new(),
            recovered: Vec::new(),
            counts: None,
        }
    }
}

pub struct PhaseController {
    root: PathBuf,
    config: Config,
    guard: CommandGuard,
    store: ChecklistStore,
    journal: Journal,
    progress: ProgressTracker,
    git: GitRecorder,
}

impl PhaseController {
    pub fn new(root: &Path, config: Config) -> Result<Self> {
        let guard = CommandGuard::new(config.policy.clone())?;
        Ok(Self {
            root: root.to_path_buf(),
            guard,
            store: ChecklistStore::new(root),
            journal: Journal::new(root),
            progress: ProgressTracker::new(root),
            git: GitRecorder::new(root),
            config,
        })
    }

    pub fn guard(&self) -> &CommandGuard {
        &self.guard
    }

    /// Run the single phase the project is currently in.
    pub fn run(&self, client: &mut dyn SessionClient, opts: &RunOptions) -> Result<RunReport> {
        std::fs::create_dir_all(&self.root)?;
        let _lock = ProjectLock::acquire(&self.root)?;

        let recovered = self.recover()?;
        let snapshot = ProjectSnapshot::capture(&self.root)?;
        let step = next_step(&snapshot, opts.approved);
        tracing::info!(root = %self.root.display(), %step, "phase selected");

        let mut report = match step {
            NextStep::Refine => self.refine(client, opts)?,
            NextStep::AwaitApproval => {
                return Err(HarnessError::PendingApproval {
                    path: paths::requirements_path(&self.root).display().to_string(),
                })
            }
            NextStep::Initialize => self.initialize(client, opts)?,
            NextStep::Code => self.code(client, opts)?,
            NextStep::Complete => {
                let mut r = RunReport::new(step, StopReason::AllPassed);
                r.counts = snapshot.checklist;
                r
            }
        };
        report.recovered = recovered;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Crash recovery
    // -----------------------------------------------------------------------

    /// Reconcile a session an earlier invocation never got to check.
    fn recover(&self) -> Result<Vec<String>> {
        let Some(snapshot) = self.journal.load()? else {
            return Ok(Vec::new());
        };
        tracing::warn!("found checklist journal from an interrupted run, reconciling");
        let outcome = self.store.reconcile(&snapshot);
        self.clear_journal_after(&outcome)?;
        match outcome {
            Ok(rec) => {
                let ids = rec.newly_passed().to_vec();
                if !ids.is_empty() {
                    self.commit(&format!("longrun: recover interrupted session ({})", ids.join(", ")));
                }
                Ok(ids)
            }
            Err(HarnessError::ChecklistIntegrity { violations }) => {
                let counts = snapshot.checklist.counts();
                let report = SessionReport {
                    session: self.progress.next_session_number()?,
                    phase: Phase::Code,
                    timestamp: Utc::now(),
                    outcome: "interrupted session rejected during recovery".to_string(),
                    attempted: None,
                    completed: Vec::new(),
                    commands_run: 0,
                    commands_denied: 0,
                    errors: Vec::new(),
                    violations: violations.clone(),
                    counts,
                    summary: "The checklist was restored to its pre-session state.".to_string(),
                    next_step: "Re-run to retry the pending features.".to_string(),
                };
                self.progress.append(&report)?;
                Err(HarnessError::ChecklistIntegrity { violations })
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Phase 0: refine
    // -----------------------------------------------------------------------

    fn refine(&self, client: &mut dyn SessionClient, opts: &RunOptions) -> Result<RunReport> {
        let mut report = RunReport::new(NextStep::Refine, StopReason::RequirementsDrafted);
        requirements::ensure_app_spec(&self.root, opts.spec.as_deref())?;

        if requirements::spec_is_empty(&self.root)? {
            tracing::warn!("app spec is missing or empty, writing a skeleton draft");
            requirements::write_skeleton(&self.root)?;
            return Ok(report);
        }

        let prompt = prompts::render(
            &prompts::load(&self.root, PromptName::Requirements)?,
            &prompts::file_vars(),
        );
        let session = self.progress.next_session_number()?;
        let checklist = paths::checklist_path(&self.root);
        let had_checklist = checklist.exists();
        let result = client.invoke(&self.request(Phase::Refine, prompt)?, &self.guard);
        report.sessions = 1;

        // Only Phase 1, after approval, may create the checklist.
        let stray = !had_checklist && checklist.exists();
        if stray {
            let rejected = paths::rejected_checklist_path(&self.root);
            tracing::warn!(
                moved_to = %rejected.display(),
                "refinement session wrote a checklist, setting it aside"
            );
            if let Some(parent) = rejected.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&checklist, &rejected)?;
        }

        let drafted = paths::requirements_path(&self.root).exists();
        if drafted {
            requirements::ensure_open_questions(&self.root)?;
        }
        let mut entry = self.entry(session, Phase::Refine, None, &result);
        if stray {
            entry.errors.push(format!(
                "{} written before approval was moved to {}",
                paths::CHECKLIST_FILE,
                paths::REJECTED_CHECKLIST_FILE
            ));
        }
        entry.next_step = if drafted {
            format!("Review {} and re-run with --approved.", paths::REQUIREMENTS_FILE)
        } else {
            "Re-run to retry requirements refinement.".to_string()
        };
        self.progress.append(&entry)?;

        result?;
        if !drafted {
            return Err(HarnessError::ExternalService(format!(
                "refinement session finished without writing {}",
                paths::REQUIREMENTS_FILE
            )));
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Phase 1: initialize
    // -----------------------------------------------------------------------

    fn initialize(&self, client: &mut dyn SessionClient, opts: &RunOptions) -> Result<RunReport> {
        let mut report = RunReport::new(NextStep::Initialize, StopReason::Initialized);
        if opts.approved && approval::status(&self.root)? != ApprovalStatus::Approved {
            approval::record(&self.root, &approval::current_user())?;
        }

        let pending = paths::pending_checklist_path(&self.root);
        let rejected = paths::rejected_checklist_path(&self.root);
        if pending.exists() {
            tracing::warn!("discarding pending checklist left by an interrupted initializer");
            std::fs::rename(&pending, &rejected)?;
        }

        let prompt = prompts::render(
            &prompts::load(&self.root, PromptName::Initializer)?,
            &prompts::file_vars(),
        );
        let session = self.progress.next_session_number()?;
        let result = client.invoke(&self.request(Phase::Initialize, prompt)?, &self.guard);
        report.sessions = 1;

        // The initializer may ignore the staging path and write the checklist
        // in place; that file was never validated, so stage it.
        let direct = paths::checklist_path(&self.root);
        if direct.exists() {
            if pending.exists() {
                std::fs::remove_file(&direct)?;
            } else {
                std::fs::rename(&direct, &pending)?;
            }
        }

        let mut entry = self.entry(session, Phase::Initialize, None, &result);
        if let Err(e) = result {
            if pending.exists() {
                std::fs::rename(&pending, &rejected)?;
            }
            entry.next_step = "Re-run to retry initialization.".to_string();
            self.progress.append(&entry)?;
            return Err(e);
        }

        let created = self.adopt_pending(&pending);
        match created {
            Ok(checklist) => {
                crate::io::remove_if_exists(&pending)?;
                let counts = checklist.counts();
                entry.counts = counts;
                entry.next_step = match checklist.items.first() {
                    Some(first) => format!("Start with {}: {}", first.id, first.description),
                    None => String::new(),
                };
                self.progress.append(&entry)?;

                let init = paths::init_script_path(&self.root);
                if init.exists() {
                    crate::io::make_executable(&init)?;
                } else {
                    tracing::warn!("initializer did not write {}", paths::INIT_SCRIPT);
                }
                if let Err(e) = self.git.ensure_repo() {
                    tracing::warn!(error = %e, "git init failed");
                }
                self.commit(&format!(
                    "longrun: initialize feature checklist ({} features)",
                    counts.total
                ));
                report.counts = Some(counts);
                Ok(report)
            }
            Err(e) => {
                if pending.exists() {
                    std::fs::rename(&pending, &rejected)?;
                }
                if let HarnessError::ChecklistIntegrity { violations } = &e {
                    entry.violations = violations.clone();
                }
                entry.outcome = "checklist rejected".to_string();
                entry.next_step = format!(
                    "Re-run to retry initialization; the rejected list is in {}.",
                    paths::REJECTED_CHECKLIST_FILE
                );
                self.progress.append(&entry)?;
                Err(e)
            }
        }
    }

    fn adopt_pending(&self, pending: &Path) -> Result<Checklist> {
        let Some(bytes) = crate::io::read_optional(pending)? else {
            return Err(HarnessError::ChecklistIntegrity {
                violations: vec![Violation::Missing],
            });
        };
        let items: Vec<FeatureItem> = Checklist::parse(&bytes)
            .map_err(|v| HarnessError::ChecklistIntegrity {
                violations: vec![v],
            })?
            .items;
        self.store.create(items)
    }

    // -----------------------------------------------------------------------
    // Phase 2: code
    // -----------------------------------------------------------------------

    fn code(&self, client: &mut dyn SessionClient, opts: &RunOptions) -> Result<RunReport> {
        let mut report = RunReport::new(NextStep::Code, StopReason::AllPassed);
        let mut skip: HashSet<String> = HashSet::new();
        let mut consecutive_external = 0u32;
        let delay = Duration::from_secs(self.config.coding.auto_continue_delay_secs);

        loop {
            let checklist = self.store.load()?;
            report.counts = Some(checklist.counts());
            if checklist.all_passed() {
                report.stop = StopReason::AllPassed;
                break;
            }
            if opts.max_iterations.is_some_and(|max| report.sessions >= max) {
                report.stop = StopReason::IterationLimit;
                break;
            }
            let Some(feature) = checklist.next_pending(&skip).cloned() else {
                report.stop = StopReason::NoAttemptableFeatures;
                break;
            };
            if report.sessions > 0 && !delay.is_zero() {
                tracing::info!(secs = delay.as_secs(), "next session starts shortly");
                std::thread::sleep(delay);
            }
            report.sessions += 1;

            let session = self.progress.next_session_number()?;
            tracing::info!(session, feature = %feature.id, counts = %checklist.counts(), "coding session");
            let before = self.store.snapshot()?;
            self.journal.record(&before)?;

            let prompt = self.coding_prompt(&feature, &checklist)?;
            let result = client.invoke(&self.request(Phase::Code, prompt)?, &self.guard);

            let reconciled = self.store.reconcile(&before);
            self.clear_journal_after(&reconciled)?;
            let mut entry = self.entry(session, Phase::Code, Some(&feature.id), &result);

            let reconciliation = match reconciled {
                Ok(rec) => rec,
                Err(HarnessError::ChecklistIntegrity { violations }) => {
                    entry.outcome = "checklist changes rejected".to_string();
                    entry.violations = violations.clone();
                    entry.counts = before.checklist.counts();
                    entry.next_step = format!(
                        "Retry {}; only flip passes from false to true in {}.",
                        feature.id,
                        paths::CHECKLIST_FILE
                    );
                    self.progress.append(&entry)?;
                    return Err(HarnessError::ChecklistIntegrity { violations });
                }
                Err(e) => return Err(e),
            };

            let after = self.store.load()?;
            entry.completed = reconciliation.newly_passed().to_vec();
            entry.counts = after.counts();
            report.newly_passed.extend(entry.completed.iter().cloned());

            let passed_assigned = after.get(&feature.id).is_some_and(|f| f.passes);
            if !passed_assigned {
                skip.insert(feature.id.clone());
                report.skipped.push(feature.id.clone());
            }
            if entry.next_step.is_empty() {
                entry.next_step = match after.next_pending(&skip) {
                    Some(next) => format!("Continue with {}: {}", next.id, next.description),
                    None if after.all_passed() => "All features pass.".to_string(),
                    None => "Re-run to retry the features that did not pass.".to_string(),
                };
            }

            let stop_run = match &result {
                Ok(_) => {
                    consecutive_external = 0;
                    false
                }
                Err(e @ HarnessError::ExternalService(_)) => {
                    consecutive_external += 1;
                    tracing::warn!(error = %e, consecutive = consecutive_external, "session failed");
                    consecutive_external >= self.config.coding.max_consecutive_failures
                }
                Err(e) if e.is_recoverable() => {
                    consecutive_external = 0;
                    tracing::warn!(error = %e, feature = %feature.id, "session failed, skipping feature");
                    false
                }
                Err(_) => true,
            };

            self.progress.append(&entry)?;
            self.commit(&format!(
                "longrun: session {session} ({}) {}",
                feature.id,
                after.counts()
            ));

            if stop_run {
                result?;
            }
        }

        tracing::info!(stop = %report.stop, sessions = report.sessions, "coding phase finished");
        Ok(report)
    }

    fn coding_prompt(&self, feature: &FeatureItem, checklist: &Checklist) -> Result<String> {
        let counts = checklist.counts();
        let last = self
            .progress
            .last_recommended_action()?
            .unwrap_or_else(|| "None recorded yet.".to_string());
        let criteria = feature
            .test_criteria
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {c}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let passing = counts.passing.to_string();
        let total = counts.total.to_string();
        let mut vars: Vec<(&str, &str)> = prompts::file_vars();
        vars.extend([
            ("feature_id", feature.id.as_str()),
            ("feature_description", feature.description.as_str()),
            ("test_criteria", criteria.as_str()),
            ("last_action", last.as_str()),
            ("passing", passing.as_str()),
            ("total", total.as_str()),
        ]);
        Ok(prompts::render(
            &prompts::load(&self.root, PromptName::Coding)?,
            &vars,
        ))
    }

    fn request(&self, phase: Phase, prompt: String) -> Result<SessionRequest> {
        let root = self.root.display().to_string();
        let system = prompts::render(
            &prompts::load(&self.root, PromptName::System)?,
            &[("project_dir", root.as_str())],
        );
        Ok(SessionRequest {
            phase,
            prompt,
            system_prompt: Some(system),
            project_dir: self.root.clone(),
            max_turns: self.config.session.max_turns,
            timeout: self.config.session.timeout(),
        })
    }

    /// Progress entry skeleton from a session result.
    fn entry(
        &self,
        session: u32,
        phase: Phase,
        attempted: Option<&str>,
        result: &Result<SessionOutcome>,
    ) -> SessionReport {
        let counts = self
            .store
            .load()
            .map(|c| c.counts())
            .unwrap_or(ChecklistCounts {
                passing: 0,
                total: 0,
            });
        let mut entry = SessionReport {
            session,
            phase,
            timestamp: Utc::now(),
            outcome: String::new(),
            attempted: attempted.map(str::to_string),
            completed: Vec::new(),
            commands_run: 0,
            commands_denied: 0,
            errors: Vec::new(),
            violations: Vec::new(),
            counts,
            summary: String::new(),
            next_step: String::new(),
        };
        match result {
            Ok(outcome) => {
                entry.outcome = outcome.status.to_string();
                entry.commands_run = outcome.commands.len();
                entry.commands_denied = outcome.denied().count();
                entry.errors = outcome
                    .denied()
                    .filter_map(|c| c.verdict.reason().map(|r| format!("denied `{}`: {r}", c.command)))
                    .collect();
                if let SessionStatus::Failed(reason) = &outcome.status {
                    entry.errors.push(reason.clone());
                }
                let (summary, next) = split_next_step(&outcome.final_text);
                entry.summary = summary;
                entry.next_step = next.unwrap_or_default();
            }
            Err(e) => {
                entry.outcome = "error".to_string();
                entry.errors.push(e.to_string());
            }
        }
        entry
    }

    /// The journal is dropped once the checklist is known-good: accepted, or
    /// rolled back to the snapshot. Any other failure keeps it for the next
    /// startup recovery.
    fn clear_journal_after(&self, outcome: &Result<Reconciliation>) -> Result<()> {
        match outcome {
            Ok(_) | Err(HarnessError::ChecklistIntegrity { .. }) => self.journal.clear(),
            Err(e) => {
                tracing::warn!(error = %e, "checklist reconcile failed, keeping journal");
                Ok(())
            }
        }
    }

    fn commit(&self, message: &str) {
        if let Err(e) = self.git.commit_all(message) {
            tracing::warn!(error = %e, "git commit failed");
        }
    }
}

/// Separate a trailing `Next step: ...` line from the agent's final message.
fn split_next_step(text: &str) -> (String, Option<String>) {
    let lines: Vec<&str> = text.lines().collect();
    let found = lines.iter().rposition(|l| {
        l.trim_start()
            .trim_start_matches(['*', '-', ' '])
            .to_ascii_lowercase()
            .starts_with("next step:")
    });
    let (summary, next) = match found {
        Some(i) => {
            let line = lines[i];
            let next = line
                .split_once(':')
                .map(|(_, rest)| rest.trim().trim_matches('*').trim().to_string())
                .filter(|s| !s.is_empty());
            let mut rest = lines.clone();
            rest.remove(i);
            (rest.join("\n"), next)
        }
        None => (text.to_string(), None),
    };
    let summary: String = summary.trim().chars().take(SUMMARY_LIMIT).collect();
    (summary, next)
}
