use crate::output::print_json;
use longrun_core::approval;
use std::path::Path;

pub fn run(root: &Path, by: Option<String>, json: bool) -> anyhow::Result<()> {
    let by = by.unwrap_or_else(approval::current_user);
    let record = approval::record(root, &by)?;
    if json {
        print_json(&record)?;
    } else {
        println!(
            "Approved requirements (sha256 {}) as {} at {}",
            &record.requirements_sha256[..12],
            record.approved_by,
            record.approved_at.to_rfc3339()
        );
        println!("Run `longrun run` to create the feature checklist.");
    }
    Ok(())
}
