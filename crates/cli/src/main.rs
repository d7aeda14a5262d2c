//! agentloom CLI — the main entry point.
//!
//! Commands:
//! - `serve`        — Start the HTTP API
//! - `run`          — Run one task in the foreground
//! - `resume`       — Continue a thread from a checkpoint
//! - `checkpoints`  — List a thread's checkpoints
//! - `steps`        — Show a thread's step trace
//! - `config`       — Print the default configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "agentloom",
    about = "agentloom — checkpointed code-execution agent runtime",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to ~/.agentloom/config.toml)
    #[arg(short, long, global = true, env = "AGENTLOOM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Run a task until it answers, runs out of steps, or times out
    Run {
        /// What the agent should do
        #[arg(short, long)]
        task: String,

        /// Step budget for this run
        #[arg(long)]
        max_steps: Option<u32>,

        /// Wall-clock budget in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Continue an existing thread instead of starting a new one
        #[arg(long)]
        thread: Option<String>,

        /// Model id or preset name
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Continue a thread from a checkpoint
    Resume {
        /// Checkpoint id (ckpt_...)
        checkpoint_id: String,
    },

    /// List the checkpoints of a thread
    Checkpoints {
        /// Thread id (th_...)
        thread_id: String,
    },

    /// Show the step trace of a thread
    Steps {
        /// Thread id (th_...)
        thread_id: String,
    },

    /// Print the default configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port, host } => commands::serve::run(config_path, host, port).await?,
        Commands::Run {
            task,
            max_steps,
            timeout,
            thread,
            model,
        } => {
            let options = commands::run::RunOptions {
                task,
                max_steps,
                timeout_secs: timeout,
                thread_id: thread,
                model,
            };
            commands::run::run(config_path, options).await?
        }
        Commands::Resume { checkpoint_id } => {
            commands::resume::run(config_path, &checkpoint_id).await?
        }
        Commands::Checkpoints { thread_id } => {
            commands::checkpoints::run(config_path, &thread_id).await?
        }
        Commands::Steps { thread_id } => commands::steps::run(config_path, &thread_id).await?,
        Commands::Config => commands::config_cmd::run(),
    }

    Ok(())
}
