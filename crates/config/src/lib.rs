//! Settings loading, validation, and management for Capstan.
//!
//! Loads agent settings from `~/.capstan/config.toml` with environment
//! variable overrides. Validates all settings before they seed a run.

use capstan_core::driver::ToolChoice;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File-loadable settings for one agent.
///
/// Maps directly to `~/.capstan/config.toml`. Every field has a default, so
/// a partial file (or no file at all) still produces a usable value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Model identifier passed through to the driver
    #[serde(default = "default_model")]
    pub model: String,

    /// Instructions injected at the start of a fresh conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Inject instructions with the developer role instead of system
    #[serde(default)]
    pub use_developer_for_instructions: bool,

    /// Estimated-token budget handed to history backends
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,

    /// Completion-token cap per round
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Re-anchor instructions every N stored messages; 0 disables
    #[serde(default)]
    pub reinject_instructions_per: u32,

    /// Forwarded to the driver only while tools are registered
    #[serde(default = "default_parallel_tool_calls", skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    /// How the model should pick among registered tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// JSON schema constraining the final response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_context_window_size() -> usize {
    50_000
}
fn default_max_completion_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    1.0
}
fn default_parallel_tool_calls() -> Option<bool> {
    Some(true)
}

impl AgentSettings {
    /// Load settings from the default path (`~/.capstan/config.toml`).
    ///
    /// Environment variables override the file:
    /// - `CAPSTAN_MODEL` replaces `model`
    /// - `CAPSTAN_INSTRUCTIONS` replaces `instructions`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut settings = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("CAPSTAN_MODEL") {
            settings.model = model;
        }
        if let Ok(instructions) = std::env::var("CAPSTAN_INSTRUCTIONS") {
            settings.instructions = Some(instructions);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no settings file found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let settings: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Directory holding the settings file.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".capstan")
    }

    /// Default base directory for file-backed histories.
    pub fn chats_dir() -> PathBuf {
        Self::config_dir().join("chats")
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model must not be empty".into(),
            ));
        }

        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.max_completion_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_completion_tokens must be at least 1".into(),
            ));
        }

        if self.context_window_size == 0 {
            return Err(ConfigError::ValidationError(
                "context_window_size must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default settings TOML string (for scaffolding a config).
    pub fn default_toml() -> String {
        let settings = Self::default();
        toml::to_string_pretty(&settings).unwrap_or_default()
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            instructions: None,
            use_developer_for_instructions: false,
            context_window_size: default_context_window_size(),
            max_completion_tokens: default_max_completion_tokens(),
            temperature: default_temperature(),
            reinject_instructions_per: 0,
            parallel_tool_calls: default_parallel_tool_calls(),
            tool_choice: None,
            response_schema: None,
        }
    }
}

/// Resolve the user's home directory.
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

    #[error("Settings validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = AgentSettings::default();
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.temperature, 1.0);
        assert_eq!(settings.parallel_tool_calls, Some(true));
        assert_eq!(settings.reinject_instructions_per, 0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn settings_roundtrip_toml() {
        let settings = AgentSettings::default();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        let parsed: AgentSettings = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, settings.model);
        assert_eq!(parsed.max_completion_tokens, settings.max_completion_tokens);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let settings = AgentSettings {
            temperature: 5.0,
            ..AgentSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_model_rejected() {
        let settings = AgentSettings {
            model: "  ".into(),
            ..AgentSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_token_cap_rejected() {
        let settings = AgentSettings {
            max_completion_tokens: 0,
            ..AgentSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AgentSettings::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().model, "gpt-4o-mini");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
model = "gpt-4o"
instructions = "You are a weather assistant."
reinject_instructions_per = 5
"#,
        )
        .unwrap();

        let settings = AgentSettings::load_from(&path).unwrap();
        assert_eq!(settings.model, "gpt-4o");
        assert_eq!(
            settings.instructions.as_deref(),
            Some("You are a weather assistant.")
        );
        assert_eq!(settings.reinject_instructions_per, 5);
        // Untouched fields keep their defaults.
        assert_eq!(settings.max_completion_tokens, 1000);
        assert_eq!(settings.parallel_tool_calls, Some(true));
    }

    #[test]
    fn tool_choice_parses_both_toml_shapes() {
        let auto: AgentSettings = toml::from_str(r#"tool_choice = "auto""#).unwrap();
        assert_eq!(auto.tool_choice, Some(ToolChoice::Auto));

        let forced: AgentSettings = toml::from_str(
            r#"
[tool_choice]
type = "function"
[tool_choice.function]
name = "get_weather"
"#,
        )
        .unwrap();
        assert_eq!(forced.tool_choice, Some(ToolChoice::Force("get_weather".into())));
    }

    #[test]
    fn response_schema_parses_from_toml() {
        let settings: AgentSettings = toml::from_str(
            r#"
[response_schema]
type = "object"
required = ["city", "forecast"]
"#,
        )
        .unwrap();

        let schema = settings.response_schema.unwrap();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"][0], "city");
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AgentSettings::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("max_completion_tokens"));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [broken").unwrap();

        let err = AgentSettings::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
