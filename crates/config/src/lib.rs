//! Configuration loading, validation, and management for agentloom.
//!
//! Loads configuration from `~/.agentloom/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.agentloom/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model gateway (LLM endpoint) settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent loop bounds and prompt
    #[serde(default)]
    pub agent: AgentConfig,

    /// Code executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Persistence backend for checkpoints, steps, and subagents
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Bounds applied to spawned subagents
    #[serde(default)]
    pub subagents: SubagentConfig,

    /// Model preset overrides (preset name → settings)
    #[serde(default)]
    pub presets: HashMap<String, PresetConfig>,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the OpenAI-compatible endpoint. Unset means the gateway
    /// is unavailable and every run fails fast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.2
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            default_model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("default_model", &self.default_model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum THINKING phases per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Wall-clock budget for one run before it checkpoints and suspends
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Timeout passed to the executor for each code execution
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Messages kept in a checkpoint's history snapshot
    #[serde(default = "default_max_checkpoint_messages")]
    pub max_checkpoint_messages: usize,

    /// Characters of code kept in step trace records
    #[serde(default = "default_trace_preview")]
    pub trace_preview_chars: usize,

    /// Characters of tool output fed back to the model
    #[serde(default = "default_max_tool_output")]
    pub max_tool_output_chars: usize,

    /// Replaces the built-in system prompt entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_steps() -> u32 {
    10
}
fn default_run_timeout() -> u64 {
    600
}
fn default_tool_timeout() -> u64 {
    60
}
fn default_max_checkpoint_messages() -> usize {
    40
}
fn default_trace_preview() -> usize {
    500
}
fn default_max_tool_output() -> usize {
    16_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            run_timeout_secs: default_run_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            max_checkpoint_messages: default_max_checkpoint_messages(),
            trace_preview_chars: default_trace_preview(),
            max_tool_output_chars: default_max_tool_output(),
            system_prompt: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// "process" (local interpreter) or "remote" (HTTP sandbox)
    #[serde(default = "default_executor_kind")]
    pub kind: String,

    /// Interpreter argv; the code is appended as the last argument
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,

    /// Remote sandbox endpoint (required for kind = "remote")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Working directory for executed code; also the directory whose
    /// files are captured in checkpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
}

fn default_executor_kind() -> String {
    "process".into()
}
fn default_interpreter() -> Vec<String> {
    vec!["sh".into(), "-c".into()]
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            kind: default_executor_kind(),
            interpreter: default_interpreter(),
            url: None,
            api_key: None,
            workspace_dir: None,
        }
    }
}

impl std::fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("kind", &self.kind)
            .field("interpreter", &self.interpreter)
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("workspace_dir", &self.workspace_dir)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database path (defaults to `~/.agentloom/agentloom.db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_subagent_timeout")]
    pub run_timeout_secs: u64,

    /// Preset name or raw model id used when a spawn names no model
    #[serde(default = "default_subagent_model")]
    pub default_model: String,
}

fn default_subagent_timeout() -> u64 {
    300
}
fn default_subagent_model() -> String {
    "balanced".into()
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            run_timeout_secs: default_subagent_timeout(),
            default_model: default_subagent_model(),
        }
    }
}

/// Settings for one named model preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetConfig {
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentloom/config.toml).
    ///
    /// Also checks environment variables:
    /// - `AGENTLOOM_API_KEY`, then `OPENAI_API_KEY`, for the gateway key
    /// - `AGENTLOOM_GATEWAY_URL` for the gateway base URL
    /// - `AGENTLOOM_MODEL` for the default model
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_file(&Self::config_dir().join("config.toml"))
    }

    /// Like [`load`](Self::load), reading `path` instead of the default file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        // Environment wins over the file for the key
        if let Some(key) = std::env::var("AGENTLOOM_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        {
            self.gateway.api_key = Some(key);
        }

        if let Ok(url) = std::env::var("AGENTLOOM_GATEWAY_URL") {
            self.gateway.base_url = Some(url);
        }

        if let Ok(model) = std::env::var("AGENTLOOM_MODEL") {
            self.gateway.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentloom")
    }

    /// The SQLite path to use when `store.path` is unset.
    pub fn database_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("agentloom.db"))
    }

    /// The executor workspace, defaulting to `~/.agentloom/workspace`.
    pub fn workspace_dir(&self) -> PathBuf {
        self.executor
            .workspace_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("workspace"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.gateway.temperature) {
            return Err(ConfigError::ValidationError(
                "gateway.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.subagents.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "subagents.max_steps must be at least 1".into(),
            ));
        }

        if self.agent.max_checkpoint_messages < 2 {
            return Err(ConfigError::ValidationError(
                "agent.max_checkpoint_messages must be at least 2".into(),
            ));
        }

        match self.executor.kind.as_str() {
            "process" => {
                if self.executor.interpreter.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "executor.interpreter must not be empty".into(),
                    ));
                }
            }
            "remote" => {
                if self.executor.url.is_none() {
                    return Err(ConfigError::ValidationError(
                        "executor.url is required when executor.kind = \"remote\"".into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown executor.kind '{other}' (expected \"process\" or \"remote\")"
                )));
            }
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown store.backend '{}' (expected \"sqlite\" or \"memory\")",
                self.store.backend
            )));
        }

        for (name, preset) in &self.presets {
            if !(0.0..=2.0).contains(&preset.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "presets.{name}.temperature must be between 0.0 and 2.0"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.gateway.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
