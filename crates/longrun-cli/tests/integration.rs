#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn longrun(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("longrun").unwrap();
    cmd.current_dir(dir.path())
        .env("LONGRUN_PROJECT_DIR", dir.path())
        .env("ANTHROPIC_API_KEY", "test-key")
        // Any accidental session spawn fails fast instead of calling out.
        .env("LONGRUN_CLAUDE_BIN", "/nonexistent/claude")
        .env_remove("RUST_LOG");
    cmd
}

fn checklist(passes: &[bool]) -> String {
    let items: Vec<serde_json::Value> = passes
        .iter()
        .enumerate()
        .map(|(i, p)| {
            serde_json::json!({
                "id": format!("F{:03}", i + 1),
                "category": "functional",
                "description": format!("Feature {}", i + 1),
                "test_criteria": ["open the app", "check it works"],
                "passes": p,
            })
        })
        .collect();
    format!("{}\n", serde_json::to_string_pretty(&items).unwrap())
}

fn write(dir: &TempDir, rel: &str, contents: &str) {
    let path = dir.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

// ---------------------------------------------------------------------------
// longrun run
// ---------------------------------------------------------------------------

#[test]
fn run_without_api_key_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    longrun(&dir)
        .env_remove("ANTHROPIC_API_KEY")
        .arg("run")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ANTHROPIC_API_KEY"));
}

#[test]
fn empty_app_spec_yields_draft_with_open_questions() {
    let dir = TempDir::new().unwrap();
    write(&dir, "app_spec.txt", "   \n");
    longrun(&dir)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("requirements drafted"));

    let draft = std::fs::read_to_string(dir.path().join("refined_requirements.md")).unwrap();
    assert!(draft.contains("## Open Questions"));
    assert!(!dir.path().join("feature_list.json").exists());
}

#[test]
fn unapproved_draft_pauses_with_exit_zero() {
    let dir = TempDir::new().unwrap();
    write(&dir, "app_spec.txt", "A todo app\n");
    write(&dir, "refined_requirements.md", "# Requirements\n\n## Open Questions\n\n- none\n");

    longrun(&dir)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("awaiting human review"));

    assert!(!dir.path().join("feature_list.json").exists());
    assert!(!dir.path().join(".longrun/feature_list.pending.json").exists());
}

#[test]
fn fully_passing_checklist_completes_without_sessions() {
    let dir = TempDir::new().unwrap();
    write(&dir, "refined_requirements.md", "# Requirements\n");
    write(&dir, "feature_list.json", &checklist(&[true, true, true]));

    longrun(&dir)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("all features pass"))
        .stdout(predicate::str::contains("3/3 passing"));
}

#[test]
fn tampered_journal_recovery_exits_3_and_restores_checklist() {
    let dir = TempDir::new().unwrap();
    let original = checklist(&[true, false]);
    write(&dir, "refined_requirements.md", "# Requirements\n");
    write(&dir, ".longrun/checklist.journal.json", &original);
    write(
        &dir,
        "feature_list.json",
        &original.replace("\"Feature 2\"", "\"Something easier\""),
    );

    longrun(&dir)
        .arg("run")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("integrity"));

    let restored = std::fs::read_to_string(dir.path().join("feature_list.json")).unwrap();
    assert_eq!(restored, original);
    assert!(!dir.path().join(".longrun/checklist.journal.json").exists());
    let progress = std::fs::read_to_string(dir.path().join("longrun-progress.md")).unwrap();
    assert!(progress.contains("rejected during recovery"));
}

// ---------------------------------------------------------------------------
// longrun approve / status
// ---------------------------------------------------------------------------

#[test]
fn approve_then_status_reports_initialize() {
    let dir = TempDir::new().unwrap();
    write(&dir, "refined_requirements.md", "# Requirements\n");

    longrun(&dir)
        .args(["approve", "--by", "reviewer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reviewer"));
    assert!(dir.path().join(".longrun/approval.yaml").exists());

    let out = longrun(&dir).args(["status", "--json"]).output().unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["next_step"], "initialize");
    assert_eq!(v["snapshot"]["approval"], "approved");
}

#[test]
fn approve_without_draft_fails() {
    let dir = TempDir::new().unwrap();
    longrun(&dir).arg("approve").assert().code(1);
}

#[test]
fn status_lists_pending_features() {
    let dir = TempDir::new().unwrap();
    write(&dir, "refined_requirements.md", "# Requirements\n");
    write(&dir, "feature_list.json", &checklist(&[true, false, false]));

    longrun(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("1/3 passing"))
        .stdout(predicate::str::contains("F002"))
        .stdout(predicate::str::contains("F003"));
}

// ---------------------------------------------------------------------------
// longrun guard / hook
// ---------------------------------------------------------------------------

#[test]
fn guard_check_allows_and_denies() {
    let dir = TempDir::new().unwrap();
    longrun(&dir)
        .args(["guard", "check", "npm install && npm test"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allow"));

    longrun(&dir)
        .args(["guard", "check", "rm -rf /"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not in the allowed commands list"));
}

#[test]
fn hook_denies_with_decision_json() {
    let dir = TempDir::new().unwrap();
    let input = r#"{"tool_name":"Bash","tool_input":{"command":"chmod 777 init.sh"}}"#;
    let out = longrun(&dir)
        .args(["hook", "pre-tool-use"])
        .write_stdin(input)
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["hookSpecificOutput"]["permissionDecision"], "deny");
}

#[test]
fn hook_allow_is_silent() {
    let dir = TempDir::new().unwrap();
    let input = r#"{"tool_name":"Bash","tool_input":{"command":"ls -la"}}"#;
    longrun(&dir)
        .args(["hook", "pre-tool-use"])
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// ---------------------------------------------------------------------------
// longrun config
// ---------------------------------------------------------------------------

#[test]
fn config_init_then_validate() {
    let dir = TempDir::new().unwrap();
    longrun(&dir).args(["config", "init"]).assert().success();
    assert!(dir.path().join(".longrun/config.yaml").exists());
    longrun(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid."));
}

#[test]
fn config_validate_fails_on_bad_pattern() {
    let dir = TempDir::new().unwrap();
    write(&dir, ".longrun/config.yaml", "policy:\n  denied_patterns:\n    - \"([unclosed\"\n");
    longrun(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("not a valid regex"));
}

#[test]
fn malformed_config_is_exit_2() {
    let dir = TempDir::new().unwrap();
    write(&dir, ".longrun/config.yaml", "session: [not, a, map\n");
    longrun(&dir).arg("run").assert().code(2);
}
