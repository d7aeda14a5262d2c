//! Persistence backends for agentloom.
//!
//! Each backend implements all three record contracts from the core crate:
//! [`CheckpointBackend`](agentloom_core::CheckpointBackend),
//! [`StepLog`](agentloom_core::StepLog), and
//! [`SubagentBackend`](agentloom_core::SubagentBackend).

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
