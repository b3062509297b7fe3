use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use longrun_core::config::{Config, WarnLevel};
use longrun_core::paths;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a default .longrun/config.yaml (no-op if one exists)
    Init,

    /// Print the effective config
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init => init(root),
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

fn init(root: &Path) -> anyhow::Result<()> {
    let path = paths::config_path(root);
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    Config::default()
        .save(root)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
