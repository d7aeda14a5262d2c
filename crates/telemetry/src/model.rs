//! Data model for run metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Per-model usage ───────────────────────────────────────────────────────

/// Gateway usage attributed to one model id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Gateway calls, successful or not.
    pub calls: u64,
    /// Calls that returned an error.
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Summed call latency.
    pub duration_ms: u64,
}

impl ModelUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────

/// Point-in-time copy of every counter, as served by `/metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Runs started, fresh and resumed.
    pub runs_started: u64,
    /// Runs started from a checkpoint.
    pub runs_resumed: u64,
    /// Finished runs keyed by outcome label (`completed`,
    /// `incomplete:timeout`, `error`, ...).
    pub runs_finished: BTreeMap<String, u64>,
    /// Steps taken by finished runs.
    pub run_steps: u64,
    pub run_duration_ms: u64,

    /// Usage keyed by model id.
    pub models: BTreeMap<String, ModelUsage>,

    pub tool_executions: u64,
    pub tool_failures: u64,
    pub tool_duration_ms: u64,

    /// Checkpoints written, keyed by reason.
    pub checkpoints_created: BTreeMap<String, u64>,
    /// Earlier checkpoints displaced by a newer one for the same thread.
    pub checkpoints_superseded: u64,

    /// Subagent status changes keyed by the status entered.
    pub subagent_transitions: BTreeMap<String, u64>,

    /// Events missed because the collector lagged behind the bus.
    pub events_dropped: u64,

    pub started_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Gateway calls across all models.
    pub fn llm_calls(&self) -> u64 {
        self.models.values().map(|m| m.calls).sum()
    }

    /// Tokens across all models.
    pub fn total_tokens(&self) -> u64 {
        self.models.values().map(ModelUsage::total_tokens).sum()
    }

    /// Finished runs with the given outcome label.
    pub fn finished(&self, outcome: &str) -> u64 {
        self.runs_finished.get(outcome).copied().unwrap_or(0)
    }

    pub fn uptime_secs(&self) -> i64 {
        (self.captured_at - self.started_at).num_seconds()
    }
}
