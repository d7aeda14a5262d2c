//! Subagent supervisor — spawns, tracks, and cancels delegated runs.
//!
//! `spawn` records a `pending` subagent and enqueues it; a separate
//! [`SubagentWorker`] drains the queue and runs each subagent as its own task
//! with a loop scoped to its capability set and model. Anything that goes
//! wrong inside a subagent run, panics included, ends in a `failed` record
//! and never reaches the caller of `spawn`.
//!
//! Cancellation marks the record `failed`; the running loop sees that before
//! its next iteration and stops. An execution already in flight is allowed to
//! finish and its result is discarded.

use agentloom_config::SubagentConfig;
use agentloom_core::error::{Error, Result, SubagentError};
use agentloom_core::event::{DomainEvent, EventBus};
use agentloom_core::subagent::{
    Subagent, SubagentBackend, SubagentResult, SubagentStatus, Transition, TransitionOutcome,
};
use agentloom_core::thread::ThreadId;
use agentloom_core::tool::{CapabilityRegistry, CapabilitySet};
use agentloom_providers::PresetTable;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::controller::{AgentLoop, CancellationCheck};
use crate::outcome::RunOutcome;

pub const CANCELLED_BY_PARENT: &str = "Cancelled by parent";

/// Parameters of a spawn request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    #[serde(default)]
    pub parent_thread_id: Option<ThreadId>,
    pub name: String,
    pub task: String,
    /// Capability names; empty means every registered capability
    #[serde(default)]
    pub tools: Vec<String>,
    /// Preset name or raw model id; defaults to the configured subagent model
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnResponse {
    pub success: bool,
    pub subagent_id: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: SubagentStatus,
}

/// Non-blocking view of a subagent's result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    pub found: bool,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubagentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SubagentResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultView {
    fn not_found() -> Self {
        Self {
            found: false,
            ready: false,
            status: None,
            result: None,
            error: None,
        }
    }
}

/// A spawned subagent waiting for the worker.
struct QueuedSubagent {
    id: String,
    capabilities: CapabilitySet,
}

/// Everything a subagent run needs, shared by the supervisor and the worker.
struct SubagentRunner {
    backend: Arc<dyn SubagentBackend>,
    template: AgentLoop,
    presets: Arc<PresetTable>,
    event_bus: Arc<EventBus>,
}

impl SubagentRunner {
    fn publish(&self, record: &Subagent) {
        self.event_bus.publish(DomainEvent::SubagentStatusChanged {
            subagent_id: record.id().to_string(),
            parent_thread_id: record.parent_thread_id.as_ref().map(|p| p.to_string()),
            status: record.status.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Apply a transition, publishing the change when it took effect.
    async fn transition(&self, id: &str, transition: Transition) -> Result<TransitionOutcome> {
        let outcome = self.backend.transition(id, transition).await?;
        if let TransitionOutcome::Applied(record) = &outcome {
            self.publish(record);
        }
        Ok(outcome)
    }

    async fn execute(&self, id: &str, capabilities: CapabilitySet) -> Result<()> {
        let record = match self.transition(id, Transition::Start).await? {
            TransitionOutcome::Applied(record) => record,
            TransitionOutcome::Rejected(record) => {
                debug!(subagent_id = id, status = %record.status, "Subagent no longer pending, not starting");
                return Ok(());
            }
        };

        let preset = self.presets.resolve(&record.model);
        info!(
            subagent_id = id,
            name = %record.name,
            model = %preset.model,
            capabilities = ?capabilities.names(),
            "Subagent running"
        );

        let agent = self
            .template
            .clone()
            .with_model(preset.model)
            .with_max_tokens(preset.max_tokens)
            .with_temperature(preset.temperature)
            .with_capabilities(capabilities)
            .with_cancellation(Arc::new(RecordCancellation {
                backend: self.backend.clone(),
                id: id.to_string(),
            }));

        let transition = match agent.run(record.thread_id.clone(), &record.task).await {
            Ok(RunOutcome::Completed {
                final_text,
                code_executions,
                ..
            }) => Transition::Complete(SubagentResult {
                text: final_text,
                tool_calls: code_executions,
            }),
            Ok(RunOutcome::Incomplete {
                reason,
                final_text,
                code_executions,
                ..
            }) => Transition::Fail {
                error: format!("Incomplete: {reason}"),
                result: Some(SubagentResult {
                    text: final_text,
                    tool_calls: code_executions,
                }),
            },
            Err(e) => Transition::Fail {
                error: e.to_string(),
                result: None,
            },
        };

        match self.transition(id, transition).await? {
            TransitionOutcome::Applied(record) => {
                info!(subagent_id = id, status = %record.status, "Subagent finished");
            }
            TransitionOutcome::Rejected(record) => {
                debug!(subagent_id = id, status = %record.status, "Subagent already finished, result discarded");
            }
        }
        Ok(())
    }

    async fn fail(&self, id: &str, error: String) {
        let transition = Transition::Fail {
            error,
            result: None,
        };
        if let Err(e) = self.transition(id, transition).await {
            error!(subagent_id = id, error = %e, "Failed to record subagent failure");
        }
    }
}

/// Reads the subagent record to decide whether its loop should stop.
struct RecordCancellation {
    backend: Arc<dyn SubagentBackend>,
    id: String,
}

#[async_trait]
impl CancellationCheck for RecordCancellation {
    async fn cancelled(&self) -> Option<String> {
        match self.backend.get(&self.id).await {
            Ok(Some(record)) if record.status == SubagentStatus::Failed => {
                Some(record.error.unwrap_or_else(|| CANCELLED_BY_PARENT.into()))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(subagent_id = %self.id, error = %e, "Could not read subagent record");
                None
            }
        }
    }
}

/// Drains the spawn queue, running each subagent as its own task.
pub struct SubagentWorker {
    runner: Arc<SubagentRunner>,
    queue: mpsc::UnboundedReceiver<QueuedSubagent>,
}

impl SubagentWorker {
    /// Run until every supervisor handle is dropped.
    pub async fn run(mut self) {
        while let Some(queued) = self.queue.recv().await {
            let runner = self.runner.clone();
            tokio::spawn(supervise(runner, queued));
        }
        debug!("Subagent queue closed, worker stopping");
    }
}

/// Run one subagent, converting errors and panics into a `failed` record.
async fn supervise(runner: Arc<SubagentRunner>, queued: QueuedSubagent) {
    let QueuedSubagent { id, capabilities } = queued;
    let task = {
        let runner = runner.clone();
        let id = id.clone();
        tokio::spawn(async move { runner.execute(&id, capabilities).await })
    };

    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(subagent_id = %id, error = %e, "Subagent execution failed");
            runner.fail(&id, e.to_string()).await;
        }
        Err(join_error) => {
            error!(subagent_id = %id, error = %join_error, "Subagent task panicked");
            runner
                .fail(&id, format!("Subagent crashed: {join_error}"))
                .await;
        }
    }
}

pub struct SubagentSupervisor {
    runner: Arc<SubagentRunner>,
    registry: Arc<CapabilityRegistry>,
    default_model: String,
    queue: mpsc::UnboundedSender<QueuedSubagent>,
}

impl SubagentSupervisor {
    /// Build a supervisor and the worker that executes its subagents.
    ///
    /// `template` provides the gateway, executor, and stores; subagent runs
    /// take their step and time budgets from `config`.
    pub fn new(
        backend: Arc<dyn SubagentBackend>,
        registry: Arc<CapabilityRegistry>,
        presets: Arc<PresetTable>,
        template: AgentLoop,
        event_bus: Arc<EventBus>,
        config: &SubagentConfig,
    ) -> (Self, SubagentWorker) {
        let template = template
            .with_max_steps(config.max_steps)
            .with_run_timeout(Duration::from_secs(config.run_timeout_secs));
        let runner = Arc::new(SubagentRunner {
            backend,
            template,
            presets,
            event_bus,
        });
        let (tx, rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            runner: runner.clone(),
            registry,
            default_model: config.default_model.clone(),
            queue: tx,
        };
        let worker = SubagentWorker { runner, queue: rx };
        (supervisor, worker)
    }

    /// Like [`new`](Self::new), with the worker already running on the
    /// current runtime.
    pub fn start(
        backend: Arc<dyn SubagentBackend>,
        registry: Arc<CapabilityRegistry>,
        presets: Arc<PresetTable>,
        template: AgentLoop,
        event_bus: Arc<EventBus>,
        config: &SubagentConfig,
    ) -> Self {
        let (supervisor, worker) = Self::new(backend, registry, presets, template, event_bus, config);
        tokio::spawn(worker.run());
        supervisor
    }

    /// Record a `pending` subagent and queue it. Returns before it starts.
    pub async fn spawn(&self, request: SpawnRequest) -> Result<SpawnResponse> {
        let capabilities = self.registry.resolve(request.tools.as_slice())?;
        let model = request
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone());

        let record = Subagent::new(
            request.parent_thread_id,
            request.name,
            request.task,
            capabilities.names(),
            model,
        );
        let id = record.id().to_string();
        self.runner.backend.insert(record.clone()).await?;
        self.runner.publish(&record);
        info!(
            subagent_id = %id,
            parent = ?record.parent_thread_id,
            name = %record.name,
            "Subagent spawned"
        );

        let queued = QueuedSubagent {
            id: id.clone(),
            capabilities,
        };
        if self.queue.send(queued).is_err() {
            self.runner
                .fail(&id, "Subagent worker is not running".into())
                .await;
            return Err(Error::Internal("subagent worker is not running".into()));
        }

        Ok(SpawnResponse {
            success: true,
            subagent_id: id,
            status: "spawned",
        })
    }

    /// Stop a subagent. A no-op reported as failure when it already finished.
    pub async fn cancel(&self, id: &str) -> Result<CancelResponse> {
        let transition = Transition::Fail {
            error: CANCELLED_BY_PARENT.into(),
            result: None,
        };
        match self.runner.transition(id, transition).await? {
            TransitionOutcome::Applied(record) => {
                info!(subagent_id = id, "Subagent cancelled");
                Ok(CancelResponse {
                    success: true,
                    error: None,
                    status: record.status,
                })
            }
            TransitionOutcome::Rejected(record) => Ok(CancelResponse {
                success: false,
                error: Some(SubagentError::AlreadyFinished.to_string()),
                status: record.status,
            }),
        }
    }

    pub async fn get_status(&self, id: &str) -> Result<Option<Subagent>> {
        self.runner.backend.get(id).await
    }

    /// The subagent's result, or `ready: false` while it is still going.
    pub async fn get_result(&self, id: &str) -> Result<ResultView> {
        let Some(record) = self.runner.backend.get(id).await? else {
            return Ok(ResultView::not_found());
        };
        let ready = record.status.is_terminal();
        Ok(ResultView {
            found: true,
            ready,
            status: Some(record.status),
            result: if ready { record.result } else { None },
            error: if ready { record.error } else { None },
        })
    }

    pub async fn list(&self, parent: &ThreadId) -> Result<Vec<Subagent>> {
        self.runner.backend.list_for_parent(parent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use crate::test_helpers::{PanickingGateway, ScriptedExecutor, ScriptedGateway, answer, code_call};
    use agentloom_core::gateway::ModelGateway;
    use agentloom_core::tool::{Capability, ToolResult};
    use agentloom_store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        supervisor: SubagentSupervisor,
    }

    fn registry() -> Arc<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::new();
        for name in ["file", "web"] {
            registry.register(Capability {
                name: name.into(),
                description: format!("{name} module"),
                input_schema: serde_json::json!({"type": "object"}),
            });
        }
        Arc::new(registry)
    }

    fn fixture(gateway: Arc<dyn ModelGateway>, executor: Arc<ScriptedExecutor>) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let event_bus = Arc::new(EventBus::new(64));
        let checkpoints = Arc::new(CheckpointStore::new(store.clone()));
        let template = AgentLoop::new(
            gateway,
            executor,
            store.clone(),
            checkpoints,
            event_bus.clone(),
            "parent-model",
        );
        let supervisor = SubagentSupervisor::start(
            store.clone(),
            registry(),
            Arc::new(PresetTable::builtin()),
            template,
            event_bus,
            &SubagentConfig::default(),
        );
        Fixture { store, supervisor }
    }

    fn request(tools: &[&str]) -> SpawnRequest {
        SpawnRequest {
            parent_thread_id: Some(ThreadId::from("th_parent")),
            name: "researcher".into(),
            task: "look things up".into(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            model: None,
        }
    }

    async fn wait_terminal(supervisor: &SubagentSupervisor, id: &str) -> Subagent {
        for _ in 0..200 {
            let record = supervisor.get_status(id).await.unwrap().unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subagent {id} never finished");
    }

    #[tokio::test]
    async fn spawn_returns_before_execution_and_completes() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Ok(code_call("curl x")), Ok(answer("found it"))]));
        let f = fixture(gateway.clone(), Arc::new(ScriptedExecutor::always(ToolResult::ok("page"))));

        let spawned = f.supervisor.spawn(request(&["web"])).await.unwrap();
        assert!(spawned.success);
        assert_eq!(spawned.status, "spawned");

        let record = wait_terminal(&f.supervisor, &spawned.subagent_id).await;
        assert_eq!(record.status, SubagentStatus::Completed);
        let result = record.result.unwrap();
        assert_eq!(result.text, "found it");
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(record.tools, vec!["web".to_string()]);

        // "balanced" preset resolves to a concrete model
        assert_eq!(gateway.requests()[0].model, "gpt-4o");
    }

    #[tokio::test]
    async fn unknown_capability_is_rejected_at_spawn() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let f = fixture(gateway, Arc::new(ScriptedExecutor::always(ToolResult::ok(""))));

        let err = f.supervisor.spawn(request(&["teleport"])).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Subagent(SubagentError::UnknownCapability(_))
        ));
        let parent = ThreadId::from("th_parent");
        assert!(f.supervisor.list(&parent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_subagent_is_contained() {
        let f = fixture(
            Arc::new(PanickingGateway),
            Arc::new(ScriptedExecutor::always(ToolResult::ok(""))),
        );

        let spawned = f.supervisor.spawn(request(&[])).await.unwrap();
        assert!(spawned.success);

        let record = wait_terminal(&f.supervisor, &spawned.subagent_id).await;
        assert_eq!(record.status, SubagentStatus::Failed);
        assert!(record.error.unwrap().contains("crashed"));
    }

    #[tokio::test]
    async fn incomplete_run_fails_with_partial_result() {
        let gateway = Arc::new(ScriptedGateway::repeating(code_call("ls")));
        let f = fixture(gateway, Arc::new(ScriptedExecutor::always(ToolResult::ok("ok"))));

        let spawned = f.supervisor.spawn(request(&["file"])).await.unwrap();
        let record = wait_terminal(&f.supervisor, &spawned.subagent_id).await;
        assert_eq!(record.status, SubagentStatus::Failed);
        assert!(record.error.unwrap().contains("ran out of steps"));
        assert_eq!(record.result.unwrap().tool_calls.len(), 10);
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_noop() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Ok(answer("done"))]));
        let f = fixture(gateway, Arc::new(ScriptedExecutor::always(ToolResult::ok(""))));

        let spawned = f.supervisor.spawn(request(&[])).await.unwrap();
        let finished = wait_terminal(&f.supervisor, &spawned.subagent_id).await;
        assert_eq!(finished.status, SubagentStatus::Completed);

        let response = f.supervisor.cancel(&spawned.subagent_id).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Subagent already finished"));

        let after = f.supervisor.get_status(&spawned.subagent_id).await.unwrap().unwrap();
        assert_eq!(after.status, SubagentStatus::Completed);
        assert_eq!(after.completed_at, finished.completed_at);
    }

    #[tokio::test]
    async fn cancel_stops_a_running_subagent_between_iterations() {
        let gateway = Arc::new(ScriptedGateway::repeating(code_call("sleep 1")));
        let executor = Arc::new(
            ScriptedExecutor::always(ToolResult::ok("tick")).with_delay(Duration::from_millis(20)),
        );
        let f = fixture(gateway.clone(), executor.clone());

        let spawned = f.supervisor.spawn(request(&[])).await.unwrap();
        while executor.calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let response = f.supervisor.cancel(&spawned.subagent_id).await.unwrap();
        assert!(response.success);
        assert_eq!(response.status, SubagentStatus::Failed);

        let record = wait_terminal(&f.supervisor, &spawned.subagent_id).await;
        assert_eq!(record.error.as_deref(), Some(CANCELLED_BY_PARENT));

        // The in-flight execution finishes, then the loop stops
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(gateway.call_count() <= 2);
        let record = f.supervisor.get_status(&spawned.subagent_id).await.unwrap().unwrap();
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn result_is_not_ready_while_pending() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Ok(answer("done"))]));
        let store = Arc::new(InMemoryStore::new());
        let event_bus = Arc::new(EventBus::default());
        let template = AgentLoop::new(
            gateway,
            Arc::new(ScriptedExecutor::always(ToolResult::ok(""))),
            store.clone(),
            Arc::new(CheckpointStore::new(store.clone())),
            event_bus.clone(),
            "m",
        );
        // Worker not started: the record stays pending
        let (supervisor, worker) = SubagentSupervisor::new(
            store.clone(),
            registry(),
            Arc::new(PresetTable::builtin()),
            template,
            event_bus,
            &SubagentConfig::default(),
        );

        let spawned = supervisor.spawn(request(&[])).await.unwrap();
        let view = supervisor.get_result(&spawned.subagent_id).await.unwrap();
        assert!(view.found);
        assert!(!view.ready);
        assert_eq!(view.status, Some(SubagentStatus::Pending));

        tokio::spawn(worker.run());
        let record = wait_terminal(&supervisor, &spawned.subagent_id).await;
        assert_eq!(record.status, SubagentStatus::Completed);
        let view = supervisor.get_result(&spawned.subagent_id).await.unwrap();
        assert!(view.ready);
        assert_eq!(view.result.unwrap().text, "done");

        assert!(!supervisor.get_result("th_missing").await.unwrap().found);
        drop(store);
    }

    #[tokio::test]
    async fn cancel_unknown_subagent_is_not_found() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let f = fixture(gateway, Arc::new(ScriptedExecutor::always(ToolResult::ok(""))));
        let err = f.supervisor.cancel("th_ghost").await.unwrap_err();
        assert!(matches!(err, Error::Subagent(SubagentError::NotFound(_))));
        drop(f.store);
    }
}
