use crate::output::{print_json, print_table};
use longrun_core::checklist::ChecklistStore;
use longrun_core::controller::{next_step, ProjectSnapshot};
use longrun_core::progress::ProgressTracker;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let snapshot = ProjectSnapshot::capture(root)?;
    let step = next_step(&snapshot, false);
    let store = ChecklistStore::new(root);
    let pending: Vec<_> = if store.exists() {
        store.load()?.pending().cloned().collect()
    } else {
        Vec::new()
    };
    let progress = ProgressTracker::new(root);
    let last_action = progress.last_recommended_action()?;
    let sessions = progress.session_count()?;

    if json {
        return print_json(&serde_json::json!({
            "next_step": step,
            "snapshot": snapshot,
            "sessions": sessions,
            "pending": pending,
            "last_recommended_action": last_action,
        }));
    }

    println!("Project: {}", root.display());
    println!("Next step: {step}");
    println!("Approval: {:?}", snapshot.approval);
    match snapshot.checklist {
        Some(counts) => println!("Checklist: {counts}"),
        None => println!("Checklist: not created"),
    }
    println!("Sessions recorded: {sessions}");
    if snapshot.journal_pending {
        println!("An interrupted session will be reconciled on the next run.");
    }
    if let Some(action) = last_action {
        println!("Last recommended action: {action}");
    }

    if !pending.is_empty() {
        println!();
        let rows: Vec<Vec<String>> = pending
            .iter()
            .map(|f| {
                vec![
                    f.id.clone(),
                    f.category.clone().unwrap_or_default(),
                    f.description.clone(),
                ]
            })
            .collect();
        print_table(&["ID", "CATEGORY", "DESCRIPTION"], &rows);
    }
    Ok(())
}
