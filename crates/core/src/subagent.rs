//! Subagents — delegated child tasks with their own thread.
//!
//! Status only advances `pending → running → {completed, failed}`; the
//! terminal states are final. Backends apply [`Transition`]s as atomic
//! read-modify-write operations using [`Subagent::apply`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::thread::ThreadId;
use crate::tool::CodeExecution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SubagentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SubagentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished subagent produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentResult {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<CodeExecution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subagent {
    /// The subagent's own thread; doubles as its id
    pub thread_id: ThreadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_thread_id: Option<ThreadId>,
    pub name: String,
    pub task: String,
    /// Allowed capability names
    pub tools: Vec<String>,
    pub model: String,
    pub status: SubagentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SubagentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// `pending → running`
    Start,
    /// `running → completed`
    Complete(SubagentResult),
    /// `pending|running → failed`
    Fail {
        error: String,
        result: Option<SubagentResult>,
    },
}

/// Whether a transition took effect.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Subagent),
    /// The record was in a status the transition does not start from.
    /// Carries the unchanged record.
    Rejected(Subagent),
}

impl Subagent {
    pub fn new(
        parent_thread_id: Option<ThreadId>,
        name: impl Into<String>,
        task: impl Into<String>,
        tools: Vec<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: ThreadId::new(),
            parent_thread_id,
            name: name.into(),
            task: task.into(),
            tools,
            model: model.into(),
            status: SubagentStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn id(&self) -> &str {
        self.thread_id.as_str()
    }

    /// Apply a transition in place. Returns `false` (and leaves the record
    /// untouched) when the current status does not allow it.
    pub fn apply(&mut self, transition: Transition) -> bool {
        match (self.status, transition) {
            (SubagentStatus::Pending, Transition::Start) => {
                self.status = SubagentStatus::Running;
                true
            }
            (SubagentStatus::Running, Transition::Complete(result)) => {
                self.status = SubagentStatus::Completed;
                self.result = Some(result);
                self.completed_at = Some(Utc::now());
                true
            }
            (SubagentStatus::Pending | SubagentStatus::Running, Transition::Fail { error, result }) => {
                self.status = SubagentStatus::Failed;
                self.error = Some(error);
                self.result = result;
                self.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }
}

/// Persistence contract for subagent records.
#[async_trait]
pub trait SubagentBackend: Send + Sync {
    async fn insert(&self, subagent: Subagent) -> Result<(), Error>;

    async fn get(&self, id: &str) -> Result<Option<Subagent>, Error>;

    async fn list_for_parent(&self, parent: &ThreadId) -> Result<Vec<Subagent>, Error>;

    /// Atomically read, apply, and write a transition.
    /// Fails with `SubagentError::NotFound` for unknown ids.
    async fn transition(&self, id: &str, transition: Transition) -> Result<TransitionOutcome, Error>;
}
