//! Model gateway clients for agentloom.
//!
//! All gateways implement the `agentloom_core::ModelGateway` trait.
//! [`PresetTable`] maps short preset names to concrete model settings.

pub mod openai_compat;
pub mod presets;

pub use openai_compat::OpenAiCompatGateway;
pub use presets::{ModelPreset, PresetTable};
