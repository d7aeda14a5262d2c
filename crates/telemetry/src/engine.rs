//! Thread-safe metrics engine that folds domain events into running counters.

use crate::model::{MetricsSnapshot, ModelUsage};
use crate::prometheus;
use agentloom_core::event::{DomainEvent, EventBus};
use chrono::Utc;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// The core metrics engine.
///
/// Counters only ever grow. Readers get a consistent copy through
/// [`snapshot`](Self::snapshot).
pub struct MetricsEngine {
    totals: RwLock<MetricsSnapshot>,
}

impl MetricsEngine {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            totals: RwLock::new(MetricsSnapshot {
                started_at: now,
                captured_at: now,
                ..Default::default()
            }),
        }
    }

    /// Fold one event into the counters.
    pub fn record(&self, event: &DomainEvent) {
        let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);

        match event {
            DomainEvent::RunStarted { resumed_from, .. } => {
                totals.runs_started += 1;
                if resumed_from.is_some() {
                    totals.runs_resumed += 1;
                }
            }
            DomainEvent::LlmCallCompleted {
                model,
                prompt_tokens,
                completion_tokens,
                duration_ms,
                success,
                ..
            } => {
                let usage = totals.models.entry(model.clone()).or_insert_with(ModelUsage::default);
                usage.calls += 1;
                if !success {
                    usage.failures += 1;
                }
                usage.prompt_tokens += u64::from(*prompt_tokens);
                usage.completion_tokens += u64::from(*completion_tokens);
                usage.duration_ms += duration_ms;
            }
            DomainEvent::ToolExecuted {
                success,
                duration_ms,
                ..
            } => {
                totals.tool_executions += 1;
                if !success {
                    totals.tool_failures += 1;
                }
                totals.tool_duration_ms += duration_ms;
            }
            DomainEvent::CheckpointCreated {
                reason, superseded, ..
            } => {
                *totals.checkpoints_created.entry(reason.clone()).or_insert(0) += 1;
                totals.checkpoints_superseded += *superseded as u64;
            }
            DomainEvent::RunFinished {
                outcome,
                steps,
                duration_ms,
                ..
            } => {
                *totals.runs_finished.entry(outcome.clone()).or_insert(0) += 1;
                totals.run_steps += u64::from(*steps);
                totals.run_duration_ms += duration_ms;
            }
            DomainEvent::SubagentStatusChanged { status, .. } => {
                *totals.subagent_transitions.entry(status.clone()).or_insert(0) += 1;
            }
        }
    }

    /// Count events the collector never saw.
    pub fn record_dropped(&self, count: u64) {
        let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
        totals.events_dropped += count;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = self
            .totals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshot.captured_at = Utc::now();
        snapshot
    }

    /// Current counters in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        prometheus::render(&self.snapshot())
    }

    /// Subscribe to `bus` and record every event until the bus is dropped.
    pub fn spawn_collector(self: Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.record(&event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Metrics collector lagged, events dropped");
                        self.record_dropped(missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Event bus closed, metrics collector stopping");
        })
    }
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new()
    }
}
