//! `agentloom resume` — Continue a thread from a checkpoint.

use std::path::Path;

pub async fn run(config_path: Option<&Path>, checkpoint_id: &str) -> anyhow::Result<()> {
    let runtime = super::runtime(config_path).await?;
    let outcome = runtime.agent.resume(checkpoint_id).await?;
    super::print_outcome(&outcome);
    Ok(())
}
