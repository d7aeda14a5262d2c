//! Domain event system — decoupled communication between bounded contexts.
//!
//! The controller, checkpoint store, and supervisor publish events as they
//! work; telemetry and the HTTP surface subscribe without the publishers
//! knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A run (fresh or resumed) began driving a thread
    RunStarted {
        thread_id: String,
        model: String,
        resumed_from: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// One model gateway call finished
    LlmCallCompleted {
        thread_id: String,
        model: String,
        prompt_tokens: u32,
        completion_tokens: u32,
        duration_ms: u64,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A code execution finished (successfully or not)
    ToolExecuted {
        thread_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A checkpoint was persisted
    CheckpointCreated {
        thread_id: String,
        checkpoint_id: String,
        iteration: u32,
        reason: String,
        superseded: usize,
        timestamp: DateTime<Utc>,
    },

    /// A run ended. `outcome` is `completed`, `incomplete:<reason>`, or `error`.
    RunFinished {
        thread_id: String,
        outcome: String,
        steps: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A subagent record changed status
    SubagentStatusChanged {
        subagent_id: String,
        parent_thread_id: Option<String>,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Slow subscribers lag and drop old events; publishers never block.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            thread_id: "th_1".into(),
            tool_name: "execute_code".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted {
                tool_name, success, ..
            } => {
                assert_eq!(tool_name, "execute_code");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::RunFinished {
            thread_id: "th_1".into(),
            outcome: "completed".into(),
            steps: 1,
            duration_ms: 5,
            timestamp: Utc::now(),
        });
    }
}
