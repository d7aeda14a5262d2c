//! The two terminal shapes of a run.

use agentloom_core::thread::ThreadId;
use agentloom_core::tool::CodeExecution;
use serde::Serialize;

/// Why a run stopped before producing a final answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum IncompleteReason {
    /// The step budget ran out while the model was still calling tools.
    StepBudgetExhausted,
    /// The model answered with neither text nor a tool call, twice in a row.
    EmptyResponse,
    /// The wall-clock budget elapsed; the run was checkpointed.
    Timeout { checkpoint_id: String, iteration: u32 },
}

impl IncompleteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepBudgetExhausted => "step_budget_exhausted",
            Self::EmptyResponse => "empty_response",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl std::fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepBudgetExhausted => write!(f, "ran out of steps"),
            Self::EmptyResponse => write!(f, "model returned an empty response"),
            Self::Timeout {
                checkpoint_id,
                iteration,
            } => write!(f, "timed out (checkpoint {checkpoint_id}, iteration {iteration})"),
        }
    }
}

/// Result of one run of the agent loop.
///
/// Errors (gateway failures, cancellation, store failures) are returned as
/// `Err` by the controller; everything else ends in one of these variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RunOutcome {
    Completed {
        thread_id: ThreadId,
        final_text: String,
        code_executions: Vec<CodeExecution>,
        /// Gateway calls made by this run
        steps: u32,
    },
    Incomplete {
        thread_id: ThreadId,
        reason: IncompleteReason,
        /// The last non-empty model text, possibly empty
        final_text: String,
        code_executions: Vec<CodeExecution>,
        steps: u32,
    },
}

impl RunOutcome {
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            Self::Completed { thread_id, .. } | Self::Incomplete { thread_id, .. } => thread_id,
        }
    }

    pub fn final_text(&self) -> &str {
        match self {
            Self::Completed { final_text, .. } | Self::Incomplete { final_text, .. } => final_text,
        }
    }

    pub fn code_executions(&self) -> &[CodeExecution] {
        match self {
            Self::Completed {
                code_executions, ..
            }
            | Self::Incomplete {
                code_executions, ..
            } => code_executions,
        }
    }

    pub fn steps(&self) -> u32 {
        match self {
            Self::Completed { steps, .. } | Self::Incomplete { steps, .. } => *steps,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// The checkpoint to resume from, when the run was suspended.
    pub fn checkpoint_id(&self) -> Option<&str> {
        match self {
            Self::Incomplete {
                reason: IncompleteReason::Timeout { checkpoint_id, .. },
                ..
            } => Some(checkpoint_id),
            _ => None,
        }
    }

    /// Label used in `RunFinished` events and metrics.
    pub fn label(&self) -> String {
        match self {
            Self::Completed { .. } => "completed".into(),
            Self::Incomplete { reason, .. } => format!("incomplete:{}", reason.as_str()),
        }
    }
}
