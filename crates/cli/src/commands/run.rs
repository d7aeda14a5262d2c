//! `agentloom run` — Run one task in the foreground.

use agentloom_core::thread::ThreadId;
use std::path::Path;
use std::time::Duration;

pub struct RunOptions {
    pub task: String,
    pub max_steps: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub thread_id: Option<String>,
    pub model: Option<String>,
}

pub async fn run(config_path: Option<&Path>, options: RunOptions) -> anyhow::Result<()> {
    if options.task.trim().is_empty() {
        anyhow::bail!("--task must not be empty");
    }
    if options.max_steps == Some(0) {
        anyhow::bail!("--max-steps must be at least 1");
    }

    let runtime = super::runtime(config_path).await?;
    let mut agent = runtime.agent.clone();
    if let Some(max_steps) = options.max_steps {
        agent = agent.with_max_steps(max_steps);
    }
    if let Some(secs) = options.timeout_secs {
        agent = agent.with_run_timeout(Duration::from_secs(secs));
    }
    if let Some(model) = options.model {
        agent = agent.with_model(model);
    }

    let thread_id = options
        .thread_id
        .map(|id| ThreadId::from(id.as_str()))
        .unwrap_or_default();
    tracing::debug!(thread_id = %thread_id, model = agent.model(), max_steps = agent.max_steps(), "Starting run");
    let outcome = agent.run(thread_id, &options.task).await?;
    super::print_outcome(&outcome);
    Ok(())
}
