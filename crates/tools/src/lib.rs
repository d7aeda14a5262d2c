//! Code executors and capability definitions for agentloom.
//!
//! The agent's one tool is "execute code". This crate provides where that
//! code runs (a local interpreter process or a remote sandbox), which
//! capability modules it may call, and the workspace file-state provider
//! captured in checkpoints.

pub mod capabilities;
pub mod process;
pub mod remote;
pub mod workspace;

pub use capabilities::default_registry;
pub use process::ProcessExecutor;
pub use remote::RemoteExecutor;
pub use workspace::WorkspaceFiles;
