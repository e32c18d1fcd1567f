//! Configuration for the chat mediator.
//!
//! Configured via a TOML file, with support for environment variable
//! interpolation using `${VAR_NAME}` syntax. Every section is optional.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 3000
//!
//! [upstream]
//! api_key = "${OPENAI_API_KEY}"
//! default_model = "gpt-4o-mini"
//!
//! [catalog]
//! state_path = "data/model_catalog.jsonl"
//!
//! [storage]
//! data_dir = "data"
//! ```

mod catalog;
mod observability;
mod server;
mod ui;
mod upstream;

use std::path::Path;

pub use catalog::*;
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use server::*;
pub use ui::*;
pub use upstream::*;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream provider configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Model catalogue and capability persistence.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// In-memory call log.
    #[serde(default)]
    pub call_log: CallLogConfig,

    /// Prompt library and conversation archive.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Bundled browser client.
    #[serde(default)]
    pub ui: UiConfig,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: AppConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port must not be 0".into()));
        }
        if self.call_log.capacity == 0 {
            return Err(ConfigError::Validation(
                "call_log.capacity must be greater than 0".into(),
            ));
        }
        if self.catalog.freshness_secs == 0 {
            return Err(ConfigError::Validation(
                "catalog.freshness_secs must be greater than 0".into(),
            ));
        }
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "storage.data_dir must not be empty".into(),
            ));
        }
        self.upstream.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

static ENV_VAR_RE: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

/// Expand `${VAR}` references, ignoring any that appear after a `#` on the same line.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR_RE.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ReasoningEffort;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_str("").unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.upstream.default_model, "gpt-4o-mini");
        assert_eq!(config.upstream.temperature, 0.7);
        assert_eq!(
            config.upstream.default_reasoning_effort,
            ReasoningEffort::Medium
        );
        assert!(config.upstream.timeout_secs.is_none());
        assert_eq!(config.catalog.freshness_secs, 86_400);
        assert_eq!(config.call_log.capacity, 300);
        assert_eq!(config.storage.prompts_path(), Path::new("data/prompts.json"));
        assert!(config.ui.enabled);
        assert_eq!(config.ui.assets_path, Path::new("public"));
    }

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 8080

            [upstream]
            api_key = "sk-test"
            base_url = "http://localhost:11434/v1"
            default_model = "o4-mini"
            temperature = 1.0
            default_reasoning_effort = "high"
            timeout_secs = 60

            [catalog]
            state_path = "/tmp/models.jsonl"
            freshness_secs = 3600

            [call_log]
            capacity = 50

            [storage]
            data_dir = "/var/lib/lcgpt"

            [ui]
            enabled = false

            [observability.logging]
            level = "debug"
            format = "json"
        "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert!(config.upstream.has_api_key());
        assert_eq!(
            config.upstream.default_reasoning_effort,
            ReasoningEffort::High
        );
        assert_eq!(config.catalog.freshness().as_secs(), 3600);
        assert_eq!(config.call_log.capacity, 50);
        assert_eq!(
            config.storage.conversations_dir(),
            Path::new("/var/lib/lcgpt/conversations")
        );
        assert!(!config.ui.enabled);
        assert_eq!(config.observability.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = AppConfig::from_str(
            r#"
            [upstream]
            apikey = "typo"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let result = AppConfig::from_str("[call_log]\ncapacity = 0");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_empty_data_dir() {
        let result = AppConfig::from_str("[storage]\ndata_dir = \"\"");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_out_of_range_temperature() {
        let result = AppConfig::from_str("[upstream]\ntemperature = 3.5");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("LCGPT_TEST_API_KEY", Some("sk-secret"), || {
            let result = expand_env_vars("api_key = \"${LCGPT_TEST_API_KEY}\"").unwrap();
            assert_eq!(result, "api_key = \"sk-secret\"");
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# api_key = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# api_key = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_missing_env_var_errors() {
        temp_env::with_var_unset("LCGPT_DEFINITELY_UNSET", || {
            let result = expand_env_vars("api_key = \"${LCGPT_DEFINITELY_UNSET}\"");
            assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "LCGPT_DEFINITELY_UNSET"));
        });
    }

    #[test]
    fn test_api_key_falls_back_to_env() {
        temp_env::with_var(API_KEY_ENV, Some("sk-from-env"), || {
            let mut upstream = UpstreamConfig::default();
            upstream.resolve_api_key();
            assert_eq!(upstream.api_key.as_deref(), Some("sk-from-env"));
        });
    }

    #[test]
    fn test_configured_api_key_wins_over_env() {
        temp_env::with_var(API_KEY_ENV, Some("sk-from-env"), || {
            let mut upstream = UpstreamConfig {
                api_key: Some("sk-configured".into()),
                ..Default::default()
            };
            upstream.resolve_api_key();
            assert_eq!(upstream.api_key.as_deref(), Some("sk-configured"));
        });
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        temp_env::with_var_unset(API_KEY_ENV, || {
            let mut upstream = UpstreamConfig {
                api_key: Some("  ".into()),
                ..Default::default()
            };
            upstream.resolve_api_key();
            assert!(!upstream.has_api_key());
        });
    }
}
