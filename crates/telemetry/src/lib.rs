//! Run metrics for agentloom.
//!
//! The [`MetricsEngine`] subscribes to the domain event bus and folds every
//! run, gateway call, code execution, checkpoint, and subagent transition into
//! counters, served in the Prometheus text format at `/metrics`.

pub mod engine;
pub mod model;
pub mod prometheus;

pub use engine::MetricsEngine;
pub use model::{MetricsSnapshot, ModelUsage};
