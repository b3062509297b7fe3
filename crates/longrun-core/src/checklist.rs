use crate::error::{HarnessError, Result};
use crate::paths;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One required feature. Every field except `passes` is frozen at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub description: String,
    #[serde(alias = "steps", deserialize_with = "one_or_many")]
    pub test_criteria: Vec<String>,
    #[serde(default)]
    pub passes: bool,
    /// Fields the initializer emitted that the harness does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FeatureItem {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        test_criteria: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category: None,
            description: description.into(),
            test_criteria,
            passes: false,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(d)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// A checklist change the store refuses to accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("checklist file was deleted")]
    Missing,
    #[error("checklist is not valid JSON: {reason}")]
    Unparseable { reason: String },
    #[error("checklist has no items")]
    Empty,
    #[error("item #{index} has an empty id")]
    EmptyId { index: usize },
    #[error("duplicate id '{id}'")]
    DuplicateId { id: String },
    #[error("item '{id}' was added after initialization")]
    ItemAdded { id: String },
    #[error("item '{id}' was removed")]
    ItemRemoved { id: String },
    #[error("items were reordered")]
    Reordered,
    #[error("item '{id}' field '{field}' was modified")]
    FieldChanged { id: String, field: String },
    #[error("item '{id}' regressed from passing to failing")]
    PassesRegressed { id: String },
    #[error("item '{id}' is already passing at creation")]
    PassingAtCreation { id: String },
}

/// Ordered feature list, persisted as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checklist {
    pub items: Vec<FeatureItem>,
}

impl Checklist {
    pub fn new(items: Vec<FeatureItem>) -> Self {
        Self { items }
    }

    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, Violation> {
        serde_json::from_slice(bytes).map_err(|e| Violation::Unparseable {
            reason: e.to_string(),
        })
    }

    /// Canonical on-disk form: pretty JSON with a trailing newline.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(self)?;
        out.push(b'\n');
        Ok(out)
    }

    pub fn get(&self, id: &str) -> Option<&FeatureItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn counts(&self) -> ChecklistCounts {
        ChecklistCounts {
            passing: self.items.iter().filter(|i| i.passes).count(),
            total: self.items.len(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.items.iter().all(|i| i.passes)
    }

    /// First failing item in checklist order that is not in `skip`.
    pub fn next_pending(&self, skip: &HashSet<String>) -> Option<&FeatureItem> {
        self.items
            .iter()
            .find(|i| !i.passes && !skip.contains(&i.id))
    }

    pub fn pending(&self) -> impl Iterator<Item = &FeatureItem> {
        self.items.iter().filter(|i| !i.passes)
    }

    /// Id well-formedness: non-empty and unique.
    fn id_violations(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut seen = HashSet::new();
        for (index, item) in self.items.iter().enumerate() {
            if item.id.trim().is_empty() {
                violations.push(Violation::EmptyId { index });
            } else if !seen.insert(item.id.as_str()) {
                violations.push(Violation::DuplicateId {
                    id: item.id.clone(),
                });
            }
        }
        violations
    }

    /// Everything that makes a freshly initialized list unacceptable.
    pub fn creation_violations(&self) -> Vec<Violation> {
        if self.items.is_empty() {
            return vec![Violation::Empty];
        }
        let mut violations = self.id_violations();
        violations.extend(
            self.items
                .iter()
                .filter(|i| i.passes)
                .map(|i| Violation::PassingAtCreation { id: i.id.clone() }),
        );
        violations
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChecklistCounts {
    pub passing: usize,
    pub total: usize,
}

impl std::fmt::Display for ChecklistCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pct = if self.total == 0 {
            0.0
        } else {
            self.passing as f64 * 100.0 / self.total as f64
        };
        write!(f, "{}/{} passing ({pct:.1}%)", self.passing, self.total)
    }
}

/// Compare `after` against `before`. Returns the ids that flipped
/// false→true, or every violation found.
pub fn diff(
    before: &Checklist,
    after: &Checklist,
) -> std::result::Result<Vec<String>, Vec<Violation>> {
    let mut violations = after.id_violations();

    let before_index: HashMap<&str, &FeatureItem> =
        before.items.iter().map(|i| (i.id.as_str(), i)).collect();
    let after_ids: HashSet<&str> = after.items.iter().map(|i| i.id.as_str()).collect();

    for item in &after.items {
        if !before_index.contains_key(item.id.as_str()) {
            violations.push(Violation::ItemAdded {
                id: item.id.clone(),
            });
        }
    }
    for item in &before.items {
        if !after_ids.contains(item.id.as_str()) {
            violations.push(Violation::ItemRemoved {
                id: item.id.clone(),
            });
        }
    }

    let kept_before: Vec<&str> = before
        .items
        .iter()
        .map(|i| i.id.as_str())
        .filter(|id| after_ids.contains(id))
        .collect();
    let kept_after: Vec<&str> = after
        .items
        .iter()
        .map(|i| i.id.as_str())
        .filter(|id| before_index.contains_key(id))
        .collect();
    if kept_before != kept_after {
        violations.push(Violation::Reordered);
    }

    let mut flipped = Vec::new();
    let mut compared = HashSet::new();
    for new in &after.items {
        let Some(old) = before_index.get(new.id.as_str()) else {
            continue;
        };
        if !compared.insert(new.id.as_str()) {
            continue;
        }
        violations.extend(field_changes(old, new));
        match (old.passes, new.passes) {
            (true, false) => violations.push(Violation::PassesRegressed { id: new.id.clone() }),
            (false, true) => flipped.push(new.id.clone()),
            _ => {}
        }
    }

    if violations.is_empty() {
        Ok(flipped)
    } else {
        Err(violations)
    }
}

fn field_changes(old: &FeatureItem, new: &FeatureItem) -> Vec<Violation> {
    let changed = |field: &str| Violation::FieldChanged {
        id: new.id.clone(),
        field: field.to_string(),
    };
    let mut out = Vec::new();
    if old.description != new.description {
        out.push(changed("description"));
    }
    if old.test_criteria != new.test_criteria {
        out.push(changed("test_criteria"));
    }
    if old.category != new.category {
        out.push(changed("category"));
    }
    let keys: HashSet<&String> = old.extra.keys().chain(new.extra.keys()).collect();
    let mut keys: Vec<&String> = keys.into_iter().collect();
    keys.sort();
    for key in keys {
        if old.extra.get(key) != new.extra.get(key) {
            out.push(changed(key));
        }
    }
    out
}

/// The exact bytes of the checklist before an untrusted mutation, plus the
/// parsed form used for diffing.
#[derive(Debug, Clone)]
pub struct ChecklistSnapshot {
    pub bytes: Vec<u8>,
    pub checklist: Checklist,
}

impl ChecklistSnapshot {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let checklist = Checklist::parse(&bytes).map_err(|v| HarnessError::ChecklistIntegrity {
            violations: vec![v],
        })?;
        Ok(Self { bytes, checklist })
    }
}

/// Result of reconciling the on-disk checklist after a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Unchanged,
    Accepted { newly_passed: Vec<String> },
}

impl Reconciliation {
    pub fn newly_passed(&self) -> &[String] {
        match self {
            Reconciliation::Unchanged => &[],
            Reconciliation::Accepted { newly_passed } => newly_passed,
        }
    }
}

/// Gatekeeper for `feature_list.json`.
///
/// Every write is validated against the current contents; the only accepted
/// change is a false→true flip of `passes` on an existing item.
pub struct ChecklistStore {
    path: PathBuf,
}

impl ChecklistStore {
    pub fn new(root: &Path) -> Self {
        Self {
            path: paths::checklist_path(root),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// One-shot initialization. Fails with `AlreadyExists` if the file is
    /// present, even when racing another writer.
    pub fn create(&self, items: Vec<FeatureItem>) -> Result<Checklist> {
        if self.exists() {
            return Err(HarnessError::AlreadyExists(self.path.display().to_string()));
        }
        let checklist = Checklist::new(items);
        let violations = checklist.creation_violations();
        if !violations.is_empty() {
            return Err(HarnessError::ChecklistIntegrity { violations });
        }

        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&checklist.to_bytes()?)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&self.path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                HarnessError::AlreadyExists(self.path.display().to_string())
            } else {
                HarnessError::Io(e.error)
            }
        })?;
        tracing::info!(path = %self.path.display(), items = checklist.items.len(), "checklist created");
        Ok(checklist)
    }

    pub fn load(&self) -> Result<Checklist> {
        Ok(self.snapshot()?.checklist)
    }

    pub fn snapshot(&self) -> Result<ChecklistSnapshot> {
        let bytes = std::fs::read(&self.path)?;
        ChecklistSnapshot::from_bytes(bytes)
    }

    pub fn all_passed(&self) -> Result<bool> {
        Ok(self.load()?.all_passed())
    }

    pub fn mark_passed(&self, id: &str) -> Result<bool> {
        self.set_passes(id, true)
    }

    /// Set `passes` on one item. Returns `false` when nothing changed.
    pub fn set_passes(&self, id: &str, value: bool) -> Result<bool> {
        let current = self.load()?;
        let item = current
            .get(id)
            .ok_or_else(|| HarnessError::NotFound(id.to_string()))?;
        if item.passes == value {
            return Ok(false);
        }
        if item.passes && !value {
            return Err(HarnessError::InvalidTransition {
                id: id.to_string(),
                reason: "passing features cannot be marked failing".to_string(),
            });
        }
        let mut proposed = current.clone();
        for item in proposed.items.iter_mut().filter(|i| i.id == id) {
            item.passes = value;
        }
        self.apply(&proposed)?;
        Ok(true)
    }

    /// Validate a whole proposed list against the current one and persist it.
    pub fn apply(&self, proposed: &Checklist) -> Result<Vec<String>> {
        let current = self.load()?;
        let flipped = diff(&current, proposed)
            .map_err(|violations| HarnessError::Unauthorized { violations })?;
        crate::io::atomic_write(&self.path, &proposed.to_bytes()?)?;
        Ok(flipped)
    }

    /// Accept or roll back whatever an untrusted session left on disk.
    ///
    /// On any violation the file is restored to `before` byte for byte and
    /// `ChecklistIntegrity` is returned.
    pub fn reconcile(&self, before: &ChecklistSnapshot) -> Result<Reconciliation> {
        let Some(bytes) = crate::io::read_optional(&self.path)? else {
            return self.reject(before, vec![Violation::Missing]);
        };
        if bytes == before.bytes {
            return Ok(Reconciliation::Unchanged);
        }
        let after = match Checklist::parse(&bytes) {
            Ok(c) => c,
            Err(v) => return self.reject(before, vec![v]),
        };
        match diff(&before.checklist, &after) {
            Ok(newly_passed) => {
                crate::io::atomic_write(&self.path, &after.to_bytes()?)?;
                if !newly_passed.is_empty() {
                    tracing::info!(ids = ?newly_passed, "checklist flips accepted");
                }
                Ok(Reconciliation::Accepted { newly_passed })
            }
            Err(violations) => self.reject(before, violations),
        }
    }

    fn reject(&self, before: &ChecklistSnapshot, violations: Vec<Violation>) -> Result<Reconciliation> {
        tracing::warn!(count = violations.len(), "rejecting checklist mutation, restoring snapshot");
        self.restore(before)?;
        Err(HarnessError::ChecklistIntegrity { violations })
    }

    pub fn restore(&self, snapshot: &ChecklistSnapshot) -> Result<()> {
        crate::io::atomic_write(&self.path, &snapshot.bytes)
    }
}

/// Pre-session snapshot persisted so a killed run can still be reconciled.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(root: &Path) -> Self {
        Self {
            path: paths::journal_path(root),
        }
    }

    pub fn record(&self, snapshot: &ChecklistSnapshot) -> Result<()> {
        crate::io::atomic_write(&self.path, &snapshot.bytes)
    }

    pub fn load(&self) -> Result<Option<ChecklistSnapshot>> {
        crate::io::read_optional(&self.path)?
            .map(ChecklistSnapshot::from_bytes)
            .transpose()
    }

    pub fn clear(&self) -> Result<()> {
        crate::io::remove_if_exists(&self.path).map(|_| ())
    }
}
