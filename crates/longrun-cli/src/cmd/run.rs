use crate::agent::ClaudeSession;
use crate::output::print_json;
use anyhow::Context;
use longrun_core::config::Config;
use longrun_core::controller::{PhaseController, RunOptions, RunReport, StopReason};
use longrun_core::{paths, HarnessError};
use std::path::{Path, PathBuf};

pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

pub struct RunArgs {
    pub approved: bool,
    pub max_iterations: Option<u32>,
    pub model: Option<String>,
    pub spec: Option<PathBuf>,
}

pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    if std::env::var(API_KEY_VAR).map_or(true, |v| v.trim().is_empty()) {
        return Err(HarnessError::Configuration(format!(
            "{API_KEY_VAR} is not set; export it before running"
        ))
        .into());
    }

    let config = Config::load(root).context("failed to load config")?;
    let controller = PhaseController::new(root, config.clone())?;
    let mut client = ClaudeSession::new(root, &config, args.model)?;
    let opts = RunOptions {
        approved: args.approved,
        max_iterations: args.max_iterations,
        spec: args.spec,
    };

    let report = controller.run(&mut client, &opts)?;
    if json {
        print_json(&report)?;
    } else {
        print_report(root, &report);
    }
    Ok(())
}

fn print_report(root: &Path, report: &RunReport) {
    for id in &report.recovered {
        println!("Recovered from interrupted run: {id} now passes");
    }
    println!("Phase: {}", report.step);
    if report.sessions > 0 {
        println!("Sessions: {}", report.sessions);
    }
    if !report.newly_passed.is_empty() {
        println!("Newly passing: {}", report.newly_passed.join(", "));
    }
    if !report.skipped.is_empty() {
        println!("Attempted without passing: {}", report.skipped.join(", "));
    }
    if let Some(counts) = report.counts {
        println!("Checklist: {counts}");
    }
    println!("Stopped: {}", report.stop);

    if report.stop == StopReason::RequirementsDrafted {
        println!();
        println!("Review the draft at {}", paths::requirements_path(root).display());
        println!("Then approve it with `longrun approve` or `longrun run --approved`.");
    }
}
