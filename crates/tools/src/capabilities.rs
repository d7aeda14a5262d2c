//! Built-in capability modules that executed code may call.
//!
//! The registry only describes contracts; the modules themselves live in the
//! execution environment.

use agentloom_core::tool::{Capability, CapabilityRegistry};
use serde_json::json;

fn capability(name: &str, description: &str, input_schema: serde_json::Value) -> Capability {
    Capability {
        name: name.into(),
        description: description.into(),
        input_schema,
    }
}

/// Create a registry with every built-in capability.
pub fn default_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();

    registry.register(capability(
        "file",
        "Read, write, list, and search files in the workspace",
        json!({
            "type": "object",
            "properties": {
                "op": {"type": "string", "enum": ["read", "write", "list", "grep"]},
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["op", "path"]
        }),
    ));

    registry.register(capability(
        "shell",
        "Run a shell command in the workspace",
        json!({
            "type": "object",
            "properties": {"command": {"type": "string"}},
            "required": ["command"]
        }),
    ));

    registry.register(capability(
        "web",
        "Search the web and fetch page content",
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "url": {"type": "string"}
            }
        }),
    ));

    registry.register(capability(
        "browser",
        "Drive a headless browser: navigate, click, screenshot",
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string"},
                "url": {"type": "string"},
                "selector": {"type": "string"}
            },
            "required": ["action"]
        }),
    ));

    registry.register(capability(
        "lsp",
        "Query a language server for diagnostics, definitions, and references",
        json!({
            "type": "object",
            "properties": {
                "method": {"type": "string"},
                "path": {"type": "string"},
                "line": {"type": "integer"},
                "character": {"type": "integer"}
            },
            "required": ["method", "path"]
        }),
    ));

    registry.register(capability(
        "beads",
        "Create and update task-tracker items used for planning",
        json!({
            "type": "object",
            "properties": {
                "op": {"type": "string", "enum": ["create", "update", "close", "list"]},
                "id": {"type": "string"},
                "title": {"type": "string"}
            },
            "required": ["op"]
        }),
    ));

    registry.register(capability(
        "artifacts",
        "Save deliverables (documents, reports, images) produced by the task",
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["name", "content"]
        }),
    ));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_modules() {
        let registry = default_registry();
        assert_eq!(
            registry.names(),
            vec!["artifacts", "beads", "browser", "file", "lsp", "shell", "web"]
        );
    }

    #[test]
    fn every_capability_has_an_object_schema() {
        let registry = default_registry();
        for name in registry.names() {
            let cap = registry.get(name).unwrap();
            assert_eq!(cap.input_schema["type"], "object", "{name}");
            assert!(!cap.description.is_empty());
        }
    }

    #[test]
    fn resolves_subagent_toolset() {
        let set = default_registry().resolve(&["web", "file"]).unwrap();
        assert_eq!(set.names(), vec!["file".to_string(), "web".to_string()]);
    }
}
