//! Tool calls, the code executor contract, and the capability registry.
//!
//! The agent's only tool is "execute code"; what that code may reach is
//! governed by capabilities (file, web, browser, ...). A subagent's capability
//! list is resolved once at spawn time into a closed [`CapabilitySet`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ExecutorError, SubagentError};
use crate::gateway::ToolSchema;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID (the model's tool_call id, or generated)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a string → value mapping
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }

    /// A string argument by name.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// The outcome of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// stdout-like output
    #[serde(default)]
    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }
}

/// One code execution as recorded in a run's trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExecution {
    pub code: String,
    pub result: ToolResult,
}

/// A request to the code executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub code: String,

    pub timeout_ms: u64,

    /// Capabilities the code may call. Empty means the executor's default set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

/// Executes code in an isolated environment.
///
/// `Ok` carries both successful and failed executions; `Err` is reserved for
/// the executor itself being unreachable or misbehaving.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: ExecutionRequest) -> Result<ToolResult, ExecutorError>;
}

/// A named capability with a validated input contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    /// JSON Schema of the capability's input
    pub input_schema: serde_json::Value,
}

/// A registry of known capabilities.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Replaces any existing one with the same name.
    pub fn register(&mut self, capability: Capability) {
        self.capabilities.insert(capability.name.clone(), capability);
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    /// List all registered capability names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.capabilities.keys().map(|s| s.as_str()).collect()
    }

    /// Resolve a list of names into an immutable set.
    ///
    /// An empty list resolves to every registered capability. Unknown names
    /// are rejected rather than silently dropped.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<CapabilitySet, SubagentError> {
        if names.is_empty() {
            return Ok(CapabilitySet::new(self.capabilities.values().cloned().collect()));
        }

        let mut resolved: Vec<Capability> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let cap = self
                .capabilities
                .get(name)
                .ok_or_else(|| SubagentError::UnknownCapability(name.to_string()))?;
            if !resolved.iter().any(|c| c.name == cap.name) {
                resolved.push(cap.clone());
            }
        }
        Ok(CapabilitySet::new(resolved))
    }
}

/// A closed, immutable set of capabilities for one run.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    capabilities: Arc<[Capability]>,
}

impl CapabilitySet {
    fn new(mut capabilities: Vec<Capability>) -> Self {
        capabilities.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            capabilities: capabilities.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// The single "execute code" schema offered to the model.
    pub fn execute_code_schema(&self) -> ToolSchema {
        let mut description = String::from(
            "Execute code in the sandboxed workspace and return its output. \
             Print anything you need to see.",
        );
        if !self.is_empty() {
            description.push_str(" Available capability modules: ");
            description.push_str(&self.names().join(", "));
            description.push('.');
        }

        ToolSchema {
            name: EXECUTE_CODE.into(),
            description,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "The code to execute"
                    }
                },
                "required": ["code"]
            }),
            primary_argument: "code".into(),
        }
    }
}

/// Name of the single tool offered in the code-execution loop.
pub const EXECUTE_CODE: &str = "execute_code";
