//! Message and Conversation domain types.
//!
//! A conversation is the append-only message sequence that defines the LLM's
//! context window for one thread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::thread::ThreadId;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The task giver, and the channel for tool feedback
    User,
    /// The model
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// The ordered message sequence owned by one thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Owning thread
    pub thread_id: ThreadId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation for a thread.
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Replace the whole sequence, e.g. when restoring from a checkpoint.
    pub fn with_messages(thread_id: ThreadId, messages: Vec<Message>) -> Self {
        Self {
            thread_id,
            messages,
            updated_at: Utc::now(),
        }
    }

    /// Append a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// A bounded copy of the sequence for snapshots.
    ///
    /// Keeps a leading system message (if any) plus the most recent messages,
    /// so at most `max` messages are returned. Deterministic for equal inputs.
    pub fn bounded_snapshot(&self, max: usize) -> Vec<Message> {
        if self.messages.len() <= max {
            return self.messages.clone();
        }
        if max == 0 {
            return Vec::new();
        }

        let head = match self.messages.first() {
            Some(m) if m.role == Role::System => Some(m.clone()),
            _ => None,
        };
        let tail_len = if head.is_some() { max - 1 } else { max };
        let tail_start = self.messages.len() - tail_len;

        head.into_iter()
            .chain(self.messages[tail_start..].iter().cloned())
            .collect()
    }
}
