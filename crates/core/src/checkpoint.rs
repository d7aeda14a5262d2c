//! Checkpoints — durable, restorable snapshots of a thread's progress.
//!
//! At most one checkpoint per thread is `active` at any time. Backends make
//! supersession atomic; see [`CheckpointBackend::insert_superseding`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::message::Message;
use crate::thread::ThreadId;

/// Why a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    Timeout,
    TokenLimit,
    Manual,
    ErrorRecovery,
}

impl CheckpointReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::TokenLimit => "token_limit",
            Self::Manual => "manual",
            Self::ErrorRecovery => "error_recovery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(Self::Timeout),
            "token_limit" => Some(Self::TokenLimit),
            "manual" => Some(Self::Manual),
            "error_recovery" => Some(Self::ErrorRecovery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Active,
    Restored,
    Completed,
    Failed,
    Superseded,
}

impl CheckpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Restored => "restored",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "restored" => Some(Self::Restored),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }

    /// `completed` and `failed` end a checkpoint's life.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which collaborator a state reference belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Files,
    Beads,
    Artifacts,
}

/// A reference to one piece of collaborator state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRef {
    /// Path, bead id, or artifact id
    pub key: String,

    /// Hex sha256 of the content at snapshot time
    pub content_hash: String,

    #[serde(default)]
    pub size: u64,

    /// Inline content, when the collaborator keeps it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The restorable part of a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Bounded-length ordered copy of the conversation
    pub message_history: Vec<Message>,

    #[serde(default)]
    pub file_state: Vec<StateRef>,

    #[serde(default)]
    pub beads_state: Vec<StateRef>,

    #[serde(default)]
    pub artifacts_produced: Vec<StateRef>,

    /// Code whose execution was in flight when the snapshot was taken.
    /// Its outcome is unknown and must be redone on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<String>,
}

impl StateSnapshot {
    pub fn refs(&self, kind: StateKind) -> &[StateRef] {
        match kind {
            StateKind::Files => &self.file_state,
            StateKind::Beads => &self.beads_state,
            StateKind::Artifacts => &self.artifacts_produced,
        }
    }

    pub fn set_refs(&mut self, kind: StateKind, refs: Vec<StateRef>) {
        match kind {
            StateKind::Files => self.file_state = refs,
            StateKind::Beads => self.beads_state = refs,
            StateKind::Artifacts => self.artifacts_produced = refs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub thread_id: ThreadId,
    /// Starts at 1, +1 for each checkpoint superseding a prior one
    pub iteration: u32,
    /// What remains to be done
    pub next_task: String,
    pub reason: CheckpointReason,
    pub status: CheckpointStatus,
    pub snapshot: StateSnapshot,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Checkpoint {
    /// A fresh `active` checkpoint.
    pub fn new(
        thread_id: ThreadId,
        iteration: u32,
        next_task: impl Into<String>,
        reason: CheckpointReason,
        snapshot: StateSnapshot,
    ) -> Self {
        Self {
            id: format!("ckpt_{}", Uuid::new_v4().simple()),
            thread_id,
            iteration,
            next_task: next_task.into(),
            reason,
            status: CheckpointStatus::Active,
            snapshot,
            created_at: Utc::now(),
            restored_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Persistence contract for checkpoints.
///
/// Implementations: SQLite, in-memory (for tests and ephemeral runs).
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Insert `checkpoint` (status `active`) and, in the same atomic
    /// operation, mark every other `active` checkpoint of its thread
    /// `superseded`. Returns the ids that were superseded.
    async fn insert_superseding(&self, checkpoint: Checkpoint) -> Result<Vec<String>, Error>;

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>, Error>;

    /// The checkpoint with the highest iteration for a thread.
    async fn latest_for_thread(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, Error>;

    /// All checkpoints of a thread, oldest iteration first.
    async fn list_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, Error>;

    /// Persist the mutable fields (status and timestamps/error) of an
    /// existing checkpoint.
    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), Error>;
}

/// A collaborator whose state is captured in checkpoints
/// (workspace files, task-tracker beads, artifacts).
#[async_trait]
pub trait StateProvider: Send + Sync {
    fn kind(&self) -> StateKind;

    async fn snapshot(&self) -> Result<Vec<StateRef>, Error>;

    async fn restore(&self, refs: &[StateRef]) -> Result<(), Error>;
}
