//! Step emitter — writes a run's chain-of-thought trace to the step log.
//!
//! The trace is observability only: a failing step log is logged and the
//! run carries on.

use agentloom_core::step::{ChainOfThoughtStep, StepKind, StepLog, StepStatus};
use agentloom_core::thread::ThreadId;
use std::sync::Arc;
use tracing::warn;

pub struct StepEmitter {
    log: Arc<dyn StepLog>,
    thread_id: ThreadId,
}

impl StepEmitter {
    pub fn new(log: Arc<dyn StepLog>, thread_id: ThreadId) -> Self {
        Self { log, thread_id }
    }

    /// Record a new step and return its id, or `None` if the log refused it.
    pub async fn emit(&self, step: ChainOfThoughtStep) -> Option<String> {
        let id = step.id.clone();
        match self.log.emit_step(&self.thread_id, step).await {
            Ok(()) => Some(id),
            Err(e) => {
                warn!(thread_id = %self.thread_id, error = %e, "Failed to emit step");
                None
            }
        }
    }

    /// Open an `active` thinking step.
    pub async fn thinking(&self, label: impl Into<String>) -> Option<String> {
        self.emit(ChainOfThoughtStep::new(StepKind::Thinking, StepStatus::Active, label))
            .await
    }

    /// Open an `active` tool step.
    pub async fn tool(
        &self,
        label: impl Into<String>,
        tool_name: &str,
        input: serde_json::Value,
    ) -> Option<String> {
        let step = ChainOfThoughtStep::new(StepKind::Tool, StepStatus::Active, label)
            .with_tool(tool_name, input);
        self.emit(step).await
    }

    /// Record a finished text step.
    pub async fn text(&self, label: impl Into<String>) -> Option<String> {
        self.emit(ChainOfThoughtStep::new(StepKind::Text, StepStatus::Complete, label))
            .await
    }

    /// Close a step opened by this emitter. `None` ids are ignored.
    pub async fn finish(&self, step_id: Option<&str>, status: StepStatus) {
        let Some(step_id) = step_id else {
            return;
        };
        if let Err(e) = self
            .log
            .update_step_status(&self.thread_id, step_id, status)
            .await
        {
            warn!(
                thread_id = %self.thread_id,
                step = step_id,
                error = %e,
                "Failed to update step status"
            );
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }
}
