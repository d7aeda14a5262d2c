//! The code-execution agent loop.
//!
//! One run alternates THINKING (a gateway call offering the single
//! `execute_code` tool) and EXECUTING (running the requested code and feeding
//! the result back as a user message) until the model answers in plain text,
//! the step budget runs out, or the wall-clock budget elapses.
//!
//! The whole cycle is raced against the wall-clock budget. When the budget
//! wins, the in-flight gateway or executor call is dropped and the loop
//! checkpoints the state it had committed so far. Code that was executing at
//! that moment is recorded as the checkpoint's pending action, to be
//! verified and redone on resume.

use agentloom_config::AgentConfig;
use agentloom_core::checkpoint::{Checkpoint, CheckpointReason, StateSnapshot};
use agentloom_core::error::{Error, GatewayError, Result};
use agentloom_core::event::{DomainEvent, EventBus};
use agentloom_core::gateway::{Completion, CompletionRequest, ModelGateway, ToolSchema};
use agentloom_core::message::{Conversation, Message, Role};
use agentloom_core::step::{StepLog, StepStatus};
use agentloom_core::thread::ThreadId;
use agentloom_core::tool::{
    CapabilitySet, CodeExecution, CodeExecutor, EXECUTE_CODE, ExecutionRequest, ToolResult,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointOutcome, CheckpointStore};
use crate::emitter::StepEmitter;
use crate::outcome::{IncompleteReason, RunOutcome};
use crate::prompt;

/// Slack on top of the per-execution timeout before the loop stops waiting
/// on an executor that ignores it.
const EXECUTOR_GRACE: Duration = Duration::from_secs(10);

/// Asked between iterations whether the run should stop.
#[async_trait]
pub trait CancellationCheck: Send + Sync {
    /// `Some(reason)` when the run must not start another iteration.
    async fn cancelled(&self) -> Option<String>;
}

/// How the step loop stopped on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Finished,
    BudgetExhausted,
    EmptyResponse,
}

/// Everything one run has committed so far.
///
/// Only mutated between await points, so whatever it holds when the run
/// future is dropped is consistent.
struct RunState {
    thread_id: ThreadId,
    /// What the run is working on; becomes the checkpoint's `next_task`
    task: String,
    conversation: Conversation,
    code_executions: Vec<CodeExecution>,
    final_text: String,
    steps: u32,
    /// Code handed to the executor whose result has not been observed
    pending_action: Option<String>,
    /// Trace step opened but not yet closed
    open_step: Option<String>,
}

impl RunState {
    fn fresh(thread_id: ThreadId, task: &str, system_prompt: &str) -> Self {
        let mut conversation = Conversation::new(thread_id.clone());
        conversation.push(Message::system(system_prompt));
        conversation.push(Message::user(task));
        Self::with_conversation(thread_id, task, conversation)
    }

    fn resumed(checkpoint: &Checkpoint, system_prompt: &str) -> Self {
        let mut messages = checkpoint.snapshot.message_history.clone();
        if messages.first().map(|m| m.role) != Some(Role::System) {
            messages.insert(0, Message::system(system_prompt));
        }
        let mut conversation = Conversation::with_messages(checkpoint.thread_id.clone(), messages);
        conversation.push(Message::user(prompt::continuation(
            &checkpoint.next_task,
            checkpoint.snapshot.pending_action.as_deref(),
            checkpoint.iteration,
        )));
        Self::with_conversation(checkpoint.thread_id.clone(), &checkpoint.next_task, conversation)
    }

    fn with_conversation(thread_id: ThreadId, task: &str, conversation: Conversation) -> Self {
        Self {
            thread_id,
            task: task.to_string(),
            conversation,
            code_executions: Vec::new(),
            final_text: String::new(),
            steps: 0,
            pending_action: None,
            open_step: None,
        }
    }

    fn into_outcome(self, reason: Option<IncompleteReason>) -> RunOutcome {
        match reason {
            None => RunOutcome::Completed {
                thread_id: self.thread_id,
                final_text: self.final_text,
                code_executions: self.code_executions,
                steps: self.steps,
            },
            Some(reason) => RunOutcome::Incomplete {
                thread_id: self.thread_id,
                reason,
                final_text: self.final_text,
                code_executions: self.code_executions,
                steps: self.steps,
            },
        }
    }
}

/// The agent loop controller.
///
/// Cheap to clone; the supervisor derives per-subagent loops from a shared
/// template with the `with_*` builders.
#[derive(Clone)]
pub struct AgentLoop {
    gateway: Arc<dyn ModelGateway>,
    executor: Arc<dyn CodeExecutor>,
    steps: Arc<dyn StepLog>,
    checkpoints: Arc<CheckpointStore>,
    event_bus: Arc<EventBus>,
    capabilities: CapabilitySet,
    cancellation: Option<Arc<dyn CancellationCheck>>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    system_prompt: String,
    max_steps: u32,
    run_timeout: Duration,
    tool_timeout: Duration,
    max_checkpoint_messages: usize,
    trace_preview_chars: usize,
    max_tool_output_chars: usize,
}

impl AgentLoop {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        executor: Arc<dyn CodeExecutor>,
        steps: Arc<dyn StepLog>,
        checkpoints: Arc<CheckpointStore>,
        event_bus: Arc<EventBus>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            executor,
            steps,
            checkpoints,
            event_bus,
            capabilities: CapabilitySet::empty(),
            cancellation: None,
            model: model.into(),
            max_tokens: 4096,
            temperature: 0.2,
            system_prompt: prompt::DEFAULT_SYSTEM_PROMPT.into(),
            max_steps: 10,
            run_timeout: Duration::from_secs(600),
            tool_timeout: Duration::from_secs(60),
            max_checkpoint_messages: 40,
            trace_preview_chars: 500,
            max_tool_output_chars: 16_000,
        }
    }

    /// Apply the `[agent]` config section.
    pub fn with_agent_config(mut self, config: &AgentConfig) -> Self {
        self.max_steps = config.max_steps;
        self.run_timeout = Duration::from_secs(config.run_timeout_secs);
        self.tool_timeout = Duration::from_secs(config.tool_timeout_secs);
        self.max_checkpoint_messages = config.max_checkpoint_messages;
        self.trace_preview_chars = config.trace_preview_chars;
        self.max_tool_output_chars = config.max_tool_output_chars;
        if let Some(system_prompt) = &config.system_prompt {
            self.system_prompt = system_prompt.clone();
        }
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Maximum THINKING phases per run.
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_max_tool_output_chars(mut self, max: usize) -> Self {
        self.max_tool_output_chars = max;
        self
    }

    pub fn with_max_checkpoint_messages(mut self, max: usize) -> Self {
        self.max_checkpoint_messages = max;
        self
    }

    /// Capabilities the executed code may call.
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_cancellation(mut self, check: Arc<dyn CancellationCheck>) -> Self {
        self.cancellation = Some(check);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Start a fresh run of `task` on `thread_id`.
    pub async fn run(&self, thread_id: ThreadId, task: &str) -> Result<RunOutcome> {
        let state = RunState::fresh(thread_id, task, &self.system_prompt);
        self.execute(state, None).await
    }

    /// Continue a thread from a checkpoint.
    ///
    /// Collaborator state is restored before the first gateway call. The
    /// source checkpoint ends `completed` when the run completes and `failed`
    /// when it errors or stops short; a run that times out again leaves it
    /// `restored` and creates the thread's next checkpoint.
    pub async fn resume(&self, checkpoint_id: &str) -> Result<RunOutcome> {
        let checkpoint = self.checkpoints.restore(checkpoint_id).await?;
        info!(
            checkpoint_id,
            thread_id = %checkpoint.thread_id,
            iteration = checkpoint.iteration,
            pending_action = checkpoint.snapshot.pending_action.is_some(),
            "Resuming from checkpoint"
        );

        let state = RunState::resumed(&checkpoint, &self.system_prompt);
        let result = self.execute(state, Some(&checkpoint.id)).await;

        let finish = match &result {
            Ok(RunOutcome::Completed { .. }) => Some((CheckpointOutcome::Completed, None)),
            Ok(RunOutcome::Incomplete {
                reason: IncompleteReason::Timeout { .. },
                ..
            }) => None,
            Ok(RunOutcome::Incomplete { reason, .. }) => {
                Some((CheckpointOutcome::Failed, Some(reason.to_string())))
            }
            Err(e) => Some((CheckpointOutcome::Failed, Some(e.to_string()))),
        };
        if let Some((outcome, error)) = finish {
            if let Err(e) = self.checkpoints.complete(&checkpoint.id, outcome, error).await {
                warn!(checkpoint_id, error = %e, "Failed to record resumed run outcome");
            }
        }
        result
    }

    async fn execute(&self, mut state: RunState, resumed_from: Option<&str>) -> Result<RunOutcome> {
        let started = Instant::now();
        info!(
            thread_id = %state.thread_id,
            model = %self.model,
            max_steps = self.max_steps,
            timeout_secs = self.run_timeout.as_secs(),
            "Run started"
        );
        self.event_bus.publish(DomainEvent::RunStarted {
            thread_id: state.thread_id.to_string(),
            model: self.model.clone(),
            resumed_from: resumed_from.map(str::to_string),
            timestamp: Utc::now(),
        });

        let emitter = StepEmitter::new(self.steps.clone(), state.thread_id.clone());
        let raced = tokio::time::timeout(self.run_timeout, self.drive(&mut state, &emitter)).await;

        let thread_id = state.thread_id.to_string();
        let steps = state.steps;
        let result = match raced {
            Ok(Ok(Stop::Finished)) => Ok(state.into_outcome(None)),
            Ok(Ok(Stop::BudgetExhausted)) => {
                Ok(state.into_outcome(Some(IncompleteReason::StepBudgetExhausted)))
            }
            Ok(Ok(Stop::EmptyResponse)) => {
                Ok(state.into_outcome(Some(IncompleteReason::EmptyResponse)))
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => match self.suspend(&mut state, &emitter).await {
                Ok(reason) => Ok(state.into_outcome(Some(reason))),
                Err(e) => Err(e),
            },
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "Run failed");
                "error".to_string()
            }
        };
        info!(thread_id = %thread_id, outcome = %label, steps, duration_ms, "Run finished");
        self.event_bus.publish(DomainEvent::RunFinished {
            thread_id,
            outcome: label,
            steps,
            duration_ms,
            timestamp: Utc::now(),
        });
        result
    }

    /// Checkpoint a run whose wall-clock budget elapsed.
    async fn suspend(&self, state: &mut RunState, emitter: &StepEmitter) -> Result<IncompleteReason> {
        warn!(
            thread_id = %state.thread_id,
            steps = state.steps,
            pending_action = state.pending_action.is_some(),
            "Run timed out, checkpointing"
        );
        close_step(emitter, state, StepStatus::Error).await;

        let snapshot = StateSnapshot {
            message_history: state
                .conversation
                .bounded_snapshot(self.max_checkpoint_messages),
            pending_action: state.pending_action.clone(),
            ..StateSnapshot::default()
        };
        let checkpoint = self
            .checkpoints
            .create_next(&state.thread_id, &state.task, CheckpointReason::Timeout, snapshot)
            .await?;

        Ok(IncompleteReason::Timeout {
            checkpoint_id: checkpoint.id,
            iteration: checkpoint.iteration,
        })
    }

    async fn drive(&self, state: &mut RunState, emitter: &StepEmitter) -> Result<Stop> {
        let tool = self.capabilities.execute_code_schema();
        let mut reprompted = false;

        loop {
            if let Some(check) = &self.cancellation {
                if let Some(reason) = check.cancelled().await {
                    info!(thread_id = %state.thread_id, reason = %reason, "Run cancelled");
                    return Err(Error::Cancelled(reason));
                }
            }
            if state.steps >= self.max_steps {
                warn!(thread_id = %state.thread_id, steps = state.steps, "Step budget exhausted");
                return Ok(Stop::BudgetExhausted);
            }
            state.steps += 1;
            debug!(thread_id = %state.thread_id, step = state.steps, "Agent loop iteration");

            // THINKING
            state.open_step = emitter.thinking(format!("Thinking (step {})", state.steps)).await;
            let completion = match self.call_gateway(state, &tool).await {
                Ok(completion) => {
                    close_step(emitter, state, StepStatus::Complete).await;
                    completion
                }
                Err(e) => {
                    close_step(emitter, state, StepStatus::Error).await;
                    return Err(e.into());
                }
            };

            if !completion.text.trim().is_empty() {
                state.final_text = completion.text.clone();
            }

            match completion.tool_call {
                None if !completion.text.trim().is_empty() => {
                    state.conversation.push(Message::assistant(&completion.text));
                    emitter
                        .text(prompt::truncate(&completion.text, self.trace_preview_chars))
                        .await;
                    return Ok(Stop::Finished);
                }
                None => {
                    if reprompted {
                        warn!(thread_id = %state.thread_id, "Second empty response, giving up");
                        return Ok(Stop::EmptyResponse);
                    }
                    warn!(thread_id = %state.thread_id, "Empty response without a tool call, re-prompting");
                    reprompted = true;
                    state
                        .conversation
                        .push(Message::user(prompt::EMPTY_RESPONSE_REPROMPT));
                }
                Some(call) => {
                    reprompted = false;

                    // EXECUTING
                    let code = call.str_arg("code").unwrap_or_default().to_string();
                    state.open_step = emitter
                        .tool(
                            "Executing code",
                            &call.name,
                            serde_json::json!({
                                "code": prompt::truncate(&code, self.trace_preview_chars)
                            }),
                        )
                        .await;

                    let started = Instant::now();
                    let result = if call.name != EXECUTE_CODE {
                        ToolResult::failed(format!("Unknown tool: {}", call.name), "")
                    } else if code.trim().is_empty() {
                        ToolResult::failed("Missing required argument: code", "")
                    } else {
                        self.execute_code(state, &code).await
                    };
                    let success = result.success;

                    state
                        .conversation
                        .push(Message::assistant(prompt::assistant_turn(&completion.text, &code)));
                    state.conversation.push(Message::user(prompt::tool_feedback(
                        &result,
                        self.max_tool_output_chars,
                    )));
                    state.code_executions.push(CodeExecution { code, result });

                    self.event_bus.publish(DomainEvent::ToolExecuted {
                        thread_id: state.thread_id.to_string(),
                        tool_name: call.name.clone(),
                        success,
                        duration_ms: started.elapsed().as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                    let status = if success {
                        StepStatus::Complete
                    } else {
                        StepStatus::Error
                    };
                    close_step(emitter, state, status).await;
                }
            }
        }
    }

    async fn call_gateway(
        &self,
        state: &RunState,
        tool: &ToolSchema,
    ) -> std::result::Result<Completion, GatewayError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: state.conversation.messages.clone(),
            tool: Some(tool.clone()),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let started = Instant::now();
        let result = self.gateway.complete(request).await;
        let usage = result
            .as_ref()
            .ok()
            .and_then(|c| c.usage)
            .unwrap_or_default();

        if let Err(e) = &result {
            warn!(thread_id = %state.thread_id, gateway = self.gateway.name(), error = %e, "Gateway call failed");
        }
        self.event_bus.publish(DomainEvent::LlmCallCompleted {
            thread_id: state.thread_id.to_string(),
            model: self.model.clone(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
            success: result.is_ok(),
            timestamp: Utc::now(),
        });
        result
    }

    /// Run code through the executor. Executor errors become failed results.
    async fn execute_code(&self, state: &mut RunState, code: &str) -> ToolResult {
        let timeout_ms = self.tool_timeout.as_millis() as u64;
        let request = ExecutionRequest {
            code: code.to_string(),
            timeout_ms,
            capabilities: self.capabilities.names(),
        };

        state.pending_action = Some(code.to_string());
        let outcome =
            tokio::time::timeout(self.tool_timeout + EXECUTOR_GRACE, self.executor.execute(request))
                .await;
        state.pending_action = None;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(thread_id = %state.thread_id, executor = self.executor.name(), error = %e, "Executor error");
                ToolResult::failed(e.to_string(), "")
            }
            Err(_) => {
                warn!(thread_id = %state.thread_id, timeout_ms, "Executor did not return in time");
                ToolResult::failed(format!("Execution timed out after {timeout_ms}ms"), "")
            }
        }
    }
}

/// Close the run's open trace step, if any.
async fn close_step(emitter: &StepEmitter, state: &mut RunState, status: StepStatus) {
    if let Some(step_id) = state.open_step.clone() {
        emitter.finish(Some(&step_id), status).await;
    }
    state.open_step = None;
}
