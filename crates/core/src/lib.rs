//! # agentloom core
//!
//! Domain types, collaborator traits, and error definitions for the agentloom
//! agent runtime. This crate performs no I/O of its own: the model gateway,
//! code executor, persistence backends, and state collaborators are all
//! traits here and implemented in their respective crates.
//!
//! ## Layout
//!
//! - [`thread`], [`message`]: the conversation a run drives
//! - [`gateway`], [`tool`]: the LLM and code-execution collaborators
//! - [`step`]: the ordered chain-of-thought trace per thread
//! - [`checkpoint`]: resumable snapshots and their persistence contract
//! - [`subagent`]: delegated child tasks and their registry contract
//! - [`event`]: broadcast domain events for observers

pub mod checkpoint;
pub mod error;
pub mod event;
pub mod gateway;
pub mod message;
pub mod step;
pub mod subagent;
pub mod thread;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use checkpoint::{
    Checkpoint, CheckpointBackend, CheckpointReason, CheckpointStatus, StateKind, StateProvider,
    StateRef, StateSnapshot,
};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use gateway::{Completion, CompletionRequest, ModelGateway, ToolSchema, Usage};
pub use message::{Conversation, Message, Role};
pub use step::{ChainOfThoughtStep, StepKind, StepLog, StepStatus};
pub use subagent::{
    Subagent, SubagentBackend, SubagentResult, SubagentStatus, Transition, TransitionOutcome,
};
pub use thread::ThreadId;
pub use tool::{
    Capability, CapabilityRegistry, CapabilitySet, CodeExecution, CodeExecutor, EXECUTE_CODE,
    ExecutionRequest, ToolCall, ToolResult,
};
