pub mod checkpoints;
pub mod config_cmd;
pub mod resume;
pub mod run;
pub mod serve;
pub mod steps;

use agentloom_agent::RunOutcome;
use agentloom_config::AppConfig;
use agentloom_server::Runtime;
use anyhow::Context;
use std::path::Path;

/// Load the config file (default location unless `path` is given).
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_file(path),
        None => AppConfig::load(),
    };
    config.context("Failed to load config")
}

/// Load config and wire the runtime.
pub async fn runtime(path: Option<&Path>) -> anyhow::Result<Runtime> {
    let config = load_config(path)?;
    Runtime::from_config(config)
        .await
        .context("Failed to start runtime")
}

/// Human-readable report of a finished run.
pub fn print_outcome(outcome: &RunOutcome) {
    println!("thread:     {}", outcome.thread_id());
    println!("outcome:    {}", outcome.label());
    println!("steps:      {}", outcome.steps());
    println!("executions: {}", outcome.code_executions().len());
    if let Some(checkpoint_id) = outcome.checkpoint_id() {
        println!("checkpoint: {checkpoint_id}  (agentloom resume {checkpoint_id})");
    }
    if !outcome.final_text().is_empty() {
        println!();
        println!("{}", outcome.final_text());
    }
}
