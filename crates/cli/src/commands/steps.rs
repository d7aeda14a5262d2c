//! `agentloom steps` — Show the step trace of a thread.

use agentloom_core::step::StepKind;
use agentloom_core::thread::ThreadId;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, thread_id: &str) -> anyhow::Result<()> {
    let runtime = super::runtime(config_path).await?;
    let steps = runtime.steps.get_steps(&ThreadId::from(thread_id)).await?;

    if steps.is_empty() {
        println!("No steps recorded for {thread_id}");
        return Ok(());
    }

    for (i, step) in steps.iter().enumerate() {
        let kind = match step.kind {
            StepKind::Thinking => "thinking",
            StepKind::Tool => "tool",
            StepKind::Text => "text",
        };
        println!("{:>3}. [{:<8}] {:<8} {}", i + 1, step.status.to_string(), kind, step.label);

        let code = step
            .input
            .as_ref()
            .and_then(|input| input.get("code"))
            .and_then(|code| code.as_str());
        if let Some(code) = code {
            for line in code.lines() {
                println!("       | {line}");
            }
        }
    }
    Ok(())
}
