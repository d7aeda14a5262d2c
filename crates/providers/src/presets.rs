//! Model presets: short names (`fast`, `balanced`, `deep`) for model settings.
//!
//! A subagent's `model` is looked up here first; anything that is not a preset
//! name is passed through as a raw model id with the gateway defaults.

use agentloom_config::AppConfig;
use serde::Serialize;
use std::collections::HashMap;

/// Concrete settings for one gateway call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelPreset {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Lookup table from preset name to settings.
#[derive(Debug, Clone)]
pub struct PresetTable {
    presets: HashMap<String, ModelPreset>,
    default_max_tokens: u32,
    default_temperature: f32,
}

impl PresetTable {
    /// The built-in table.
    pub fn builtin() -> Self {
        let mut presets = HashMap::new();
        presets.insert(
            "fast".to_string(),
            ModelPreset {
                model: "gpt-4o-mini".into(),
                max_tokens: 2048,
                temperature: 0.2,
            },
        );
        presets.insert(
            "balanced".to_string(),
            ModelPreset {
                model: "gpt-4o".into(),
                max_tokens: 4096,
                temperature: 0.2,
            },
        );
        presets.insert(
            "deep".to_string(),
            ModelPreset {
                model: "gpt-4.1".into(),
                max_tokens: 8192,
                temperature: 0.1,
            },
        );

        Self {
            presets,
            default_max_tokens: 4096,
            default_temperature: 0.2,
        }
    }

    /// The built-in table with `[presets.*]` overrides and gateway defaults
    /// from config.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut table = Self::builtin();
        table.default_max_tokens = config.gateway.max_tokens;
        table.default_temperature = config.gateway.temperature;
        for (name, preset) in &config.presets {
            table.presets.insert(
                name.clone(),
                ModelPreset {
                    model: preset.model.clone(),
                    max_tokens: preset.max_tokens,
                    temperature: preset.temperature,
                },
            );
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<&ModelPreset> {
        self.presets.get(name)
    }

    /// Resolve a preset name or raw model id.
    pub fn resolve(&self, model_or_preset: &str) -> ModelPreset {
        match self.presets.get(model_or_preset) {
            Some(preset) => preset.clone(),
            None => ModelPreset {
                model: model_or_preset.to_string(),
                max_tokens: self.default_max_tokens,
                temperature: self.default_temperature,
            },
        }
    }

    /// Preset names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.presets.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PresetTable {
    fn default() -> Self {
        Self::builtin()
    }
}
