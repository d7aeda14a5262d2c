//! Model gateway trait — the abstraction over the LLM completion endpoint.
//!
//! In the code-execution loop the model is offered at most one tool per call:
//! it either invokes that capability or produces a final answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::message::Message;
use crate::tool::ToolCall;

/// A tool schema offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,

    /// The argument that receives raw text when the model's argument payload
    /// is not valid JSON.
    pub primary_argument: String,
}

/// A single chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use
    pub model: String,

    /// The full ordered message history
    pub messages: Vec<Message>,

    /// Zero or one tool the model may call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolSchema>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 = deterministic)
    pub temperature: f32,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The parsed model response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    /// Text content (the final answer when no tool call is present)
    #[serde(default)]
    pub text: String,

    /// The requested tool invocation, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Completion {
    /// A plain-text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some("stop".into()),
            ..Self::default()
        }
    }

    /// A tool invocation with optional accompanying text.
    pub fn with_tool_call(text: impl Into<String>, call: ToolCall) -> Self {
        Self {
            text: text.into(),
            tool_call: Some(call),
            finish_reason: Some("tool_calls".into()),
            ..Self::default()
        }
    }

    /// Whether this response is a usable final answer.
    pub fn is_final_answer(&self) -> bool {
        self.tool_call.is_none() && !self.text.trim().is_empty()
    }
}

/// The model gateway client.
///
/// Referentially transparent from the controller's point of view: no caching,
/// no retries, no side effects beyond the network call.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// A human-readable name for this gateway.
    fn name(&self) -> &str;

    /// Send a request and get the parsed completion.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError>;
}
