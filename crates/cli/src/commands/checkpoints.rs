//! `agentloom checkpoints` — List the checkpoints of a thread.

use agentloom_core::checkpoint::CheckpointStatus;
use agentloom_core::thread::ThreadId;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, thread_id: &str) -> anyhow::Result<()> {
    let runtime = super::runtime(config_path).await?;
    let checkpoints = runtime.checkpoints.list(&ThreadId::from(thread_id)).await?;

    if checkpoints.is_empty() {
        println!("No checkpoints for {thread_id}");
        return Ok(());
    }

    println!("{:<38} {:>4}  {:<10} {:<10} {}", "ID", "ITER", "STATUS", "REASON", "CREATED");
    for checkpoint in &checkpoints {
        println!(
            "{:<38} {:>4}  {:<10} {:<10} {}",
            checkpoint.id,
            checkpoint.iteration,
            checkpoint.status.as_str(),
            checkpoint.reason.as_str(),
            checkpoint.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    if let Some(active) = checkpoints.iter().find(|c| c.status == CheckpointStatus::Active) {
        println!();
        println!("Resume with: agentloom resume {}", active.id);
    }
    Ok(())
}
