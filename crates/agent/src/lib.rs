//! The agent runtime: the code-execution loop and everything it drives.
//!
//! A run alternates between asking the model what to do and executing the
//! code it asks for:
//!
//! 1. **Think**: call the model gateway with the conversation and the single
//!    `execute_code` tool
//! 2. **Execute**: run the requested code in the sandbox executor and feed
//!    the result back
//! 3. **Finish** when the model answers in plain text
//!
//! Runs are bounded by a step budget and a wall-clock budget. When the clock
//! runs out the committed state is saved as a checkpoint that a later
//! [`AgentLoop::resume`] continues from. Child tasks are delegated through the
//! [`SubagentSupervisor`].

pub mod checkpoint;
pub mod controller;
pub mod emitter;
pub mod outcome;
pub mod prompt;
pub mod supervisor;

#[cfg(test)]
mod test_helpers;

pub use checkpoint::{CheckpointOutcome, CheckpointStore};
pub use controller::{AgentLoop, CancellationCheck};
pub use emitter::StepEmitter;
pub use outcome::{IncompleteReason, RunOutcome};
pub use supervisor::{
    CancelResponse, ResultView, SpawnRequest, SpawnResponse, SubagentSupervisor, SubagentWorker,
};
