//! `agentloom serve` — Start the HTTP API server.

use std::path::Path;

pub async fn run(config_path: Option<&Path>, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let runtime = super::runtime(config_path).await?;
    let host = host.unwrap_or_else(|| runtime.config.server.host.clone());
    let port = port.unwrap_or(runtime.config.server.port);

    println!("agentloom API on http://{host}:{port}");
    println!("  POST /v1/runs            Run a task");
    println!("  POST /v1/runs/resume     Resume from a checkpoint");
    println!("  POST /v1/subagents       Spawn a subagent");
    println!("  GET  /metrics            Prometheus metrics");

    agentloom_server::serve(runtime, &host, port).await?;
    Ok(())
}
