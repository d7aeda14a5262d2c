//! Runtime wiring: builds every subsystem from an [`AppConfig`] once and
//! shares it between the HTTP surface and the CLI.

use agentloom_agent::{AgentLoop, CheckpointStore, SubagentSupervisor};
use agentloom_config::AppConfig;
use agentloom_core::checkpoint::CheckpointBackend;
use agentloom_core::event::EventBus;
use agentloom_core::gateway::ModelGateway;
use agentloom_core::step::StepLog;
use agentloom_core::subagent::SubagentBackend;
use agentloom_core::tool::{CapabilityRegistry, CodeExecutor};
use agentloom_providers::{OpenAiCompatGateway, PresetTable};
use agentloom_store::{InMemoryStore, SqliteStore};
use agentloom_telemetry::MetricsEngine;
use agentloom_tools::{ProcessExecutor, RemoteExecutor, WorkspaceFiles};
use std::sync::Arc;
use tracing::info;

use crate::ServerError;

/// The three record stores, usually all backed by one database.
#[derive(Clone)]
pub struct Backends {
    pub checkpoints: Arc<dyn CheckpointBackend>,
    pub steps: Arc<dyn StepLog>,
    pub subagents: Arc<dyn SubagentBackend>,
}

impl Backends {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            checkpoints: store.clone(),
            steps: store.clone(),
            subagents: store,
        }
    }

    /// Open the backend named by `store.backend`.
    pub async fn open(config: &AppConfig) -> Result<Self, ServerError> {
        match config.store.backend.as_str() {
            "memory" => Ok(Self::in_memory()),
            "sqlite" => {
                let path = config.database_path();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let url = format!("sqlite://{}", path.display());
                let store = Arc::new(SqliteStore::new(&url).await?);
                Ok(Self {
                    checkpoints: store.clone(),
                    steps: store.clone(),
                    subagents: store,
                })
            }
            other => Err(ServerError::Config(format!("unknown store backend '{other}'"))),
        }
    }
}

/// Everything a request or command needs, built once.
#[derive(Clone)]
pub struct Runtime {
    pub config: AppConfig,
    pub event_bus: Arc<EventBus>,
    pub metrics: Arc<MetricsEngine>,
    pub checkpoints: Arc<CheckpointStore>,
    pub steps: Arc<dyn StepLog>,
    pub agent: AgentLoop,
    pub supervisor: Arc<SubagentSupervisor>,
    pub registry: Arc<CapabilityRegistry>,
}

impl Runtime {
    /// Build the runtime from configuration: real gateway, configured
    /// executor and store.
    pub async fn from_config(config: AppConfig) -> Result<Self, ServerError> {
        let backends = Backends::open(&config).await?;
        let gateway: Arc<dyn ModelGateway> = Arc::new(OpenAiCompatGateway::from_config(&config.gateway));
        if config.gateway.base_url.is_none() {
            tracing::warn!("No gateway base_url configured; model calls will fail");
        } else if !config.has_api_key() {
            tracing::info!("No gateway API key configured; sending unauthenticated requests");
        }

        let executor: Arc<dyn CodeExecutor> = match config.executor.kind.as_str() {
            "remote" => {
                let url = config
                    .executor
                    .url
                    .clone()
                    .ok_or_else(|| ServerError::Config("executor.url is required for the remote executor".into()))?;
                Arc::new(RemoteExecutor::new(url, config.executor.api_key.clone()))
            }
            _ => {
                let workspace = config.workspace_dir();
                tokio::fs::create_dir_all(&workspace).await?;
                Arc::new(ProcessExecutor::new(
                    config.executor.interpreter.clone(),
                    Some(workspace),
                ))
            }
        };

        info!(
            store = %config.store.backend,
            executor = %config.executor.kind,
            model = %config.gateway.default_model,
            "Runtime configured"
        );
        Ok(Self::assemble(config, gateway, executor, backends))
    }

    /// Wire the runtime from explicit parts. Must run inside a tokio runtime:
    /// the metrics collector and the subagent worker are spawned here.
    pub fn assemble(
        config: AppConfig,
        gateway: Arc<dyn ModelGateway>,
        executor: Arc<dyn CodeExecutor>,
        backends: Backends,
    ) -> Self {
        let event_bus = Arc::new(EventBus::default());
        let metrics = Arc::new(MetricsEngine::new());
        metrics.clone().spawn_collector(&event_bus);

        let mut checkpoints = CheckpointStore::new(backends.checkpoints).with_event_bus(event_bus.clone());
        // Workspace state is only ours to snapshot when code runs locally
        if config.executor.kind == "process" {
            checkpoints = checkpoints.with_provider(Arc::new(WorkspaceFiles::new(config.workspace_dir())));
        }
        let checkpoints = Arc::new(checkpoints);

        let registry = Arc::new(agentloom_tools::default_registry());
        let presets = Arc::new(PresetTable::from_config(&config));

        let agent = AgentLoop::new(
            gateway,
            executor,
            backends.steps.clone(),
            checkpoints.clone(),
            event_bus.clone(),
            config.gateway.default_model.clone(),
        )
        .with_agent_config(&config.agent)
        .with_max_tokens(config.gateway.max_tokens)
        .with_temperature(config.gateway.temperature)
        .with_capabilities(registry.resolve::<&str>(&[]).unwrap_or_default());

        let supervisor = Arc::new(SubagentSupervisor::start(
            backends.subagents,
            registry.clone(),
            presets,
            agent.clone(),
            event_bus.clone(),
            &config.subagents,
        ));

        Self {
            config,
            event_bus,
            metrics,
            checkpoints,
            steps: backends.steps,
            agent,
            supervisor,
            registry,
        }
    }
}
