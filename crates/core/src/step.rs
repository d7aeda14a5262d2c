//! Chain-of-thought steps — the ordered observability trace of a thread.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, StepError};
use crate::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thinking,
    Tool,
    Text,
}

/// Step status. Transitions are monotonic:
/// `pending → active → {complete, error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Complete,
    Error,
}

impl StepStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Complete | Self::Error => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Whether moving from `self` to `next` respects monotonicity.
    pub fn can_advance_to(self, next: StepStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Validate a transition, producing the error the step log reports.
    pub fn check_transition(self, next: StepStatus) -> Result<(), StepError> {
        if self.can_advance_to(next) {
            Ok(())
        } else {
            Err(StepError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One unit of agent activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainOfThoughtStep {
    /// Unique within the thread
    pub id: String,

    #[serde(rename = "type")]
    pub kind: StepKind,

    pub status: StepStatus,

    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

impl ChainOfThoughtStep {
    pub fn new(kind: StepKind, status: StepStatus, label: impl Into<String>) -> Self {
        Self {
            id: format!("step_{}", Uuid::new_v4().simple()),
            kind,
            status,
            label: label.into(),
            tool_name: None,
            input: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        self.tool_name = Some(tool_name.into());
        self.input = Some(input);
        self
    }
}

/// Per-thread append-only step log.
///
/// Backends must keep steps in emission order and reject non-monotonic
/// status updates with [`StepError::InvalidTransition`].
#[async_trait]
pub trait StepLog: Send + Sync {
    async fn emit_step(&self, thread_id: &ThreadId, step: ChainOfThoughtStep) -> Result<(), Error>;

    async fn update_step_status(
        &self,
        thread_id: &ThreadId,
        step_id: &str,
        status: StepStatus,
    ) -> Result<(), Error>;

    async fn get_steps(&self, thread_id: &ThreadId) -> Result<Vec<ChainOfThoughtStep>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(StepStatus::Pending.can_advance_to(StepStatus::Active));
        assert!(StepStatus::Active.can_advance_to(StepStatus::Complete));
        assert!(StepStatus::Active.can_advance_to(StepStatus::Error));
        assert!(StepStatus::Pending.can_advance_to(StepStatus::Error));
    }

    #[test]
    fn backward_and_terminal_transitions_are_rejected() {
        assert!(!StepStatus::Active.can_advance_to(StepStatus::Pending));
        assert!(!StepStatus::Active.can_advance_to(StepStatus::Active));
        assert!(!StepStatus::Complete.can_advance_to(StepStatus::Error));
        assert!(!StepStatus::Error.can_advance_to(StepStatus::Complete));
    }

    #[test]
    fn check_transition_reports_both_ends() {
        let err = StepStatus::Complete
            .check_transition(StepStatus::Active)
            .unwrap_err();
        assert!(err.to_string().contains("complete -> active"));
    }

    #[test]
    fn step_serializes_type_field() {
        let step = ChainOfThoughtStep::new(StepKind::Tool, StepStatus::Active, "Running code")
            .with_tool("execute_code", serde_json::json!({"code": "ls"}));
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "tool");
        assert_eq!(json["status"], "active");
        assert_eq!(json["toolName"], "execute_code");
    }
}
