//! Error types for the agentloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum, folded into [`Error`].

use thiserror::Error;

/// The top-level error type for all agentloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model gateway errors ---
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // --- Code executor errors ---
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Checkpoint lifecycle errors ---
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    // --- Step trace errors ---
    #[error("Step error: {0}")]
    Step(#[from] StepError),

    // --- Subagent errors ---
    #[error("Subagent error: {0}")]
    Subagent(#[from] SubagentError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was stopped between iterations by its supervisor.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Transport or credentials are not configured. Never retried.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    /// The remote returned a non-success status or an application-level error.
    #[error("Gateway request failed: {message} (status: {status_code})")]
    RequestFailed { status_code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Gateway request timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("Executor unreachable: {0}")]
    Unreachable(String),

    #[error("Execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Failed to start execution: {0}")]
    Spawn(String),

    #[error("Invalid execution request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Checkpoint {id} is already {status}")]
    AlreadyTerminal { id: String, status: String },

    #[error("Checkpoint iteration {iteration} for thread {thread_id} is out of order (expected {expected})")]
    IterationOutOfOrder {
        thread_id: String,
        iteration: u32,
        expected: u32,
    },
}

#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("Step not found: {step_id} in thread {thread_id}")]
    NotFound { thread_id: String, step_id: String },

    #[error("Step {step_id} already exists in thread {thread_id}")]
    Duplicate { thread_id: String, step_id: String },

    #[error("Invalid step transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

#[derive(Debug, Clone, Error)]
pub enum SubagentError {
    #[error("Subagent not found: {0}")]
    NotFound(String),

    #[error("Subagent already finished")]
    AlreadyFinished,

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),
}
