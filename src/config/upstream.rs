use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::dispatch::ReasoningEffort;

/// Environment variable consulted when `upstream.api_key` is not configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Upstream language-model provider configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// API key for the provider. Falls back to `OPENAI_API_KEY` when unset.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used when a chat request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Sampling temperature sent to models not known to reject it.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Reasoning effort used when a chat request does not specify one.
    #[serde(default = "default_reasoning_effort")]
    pub default_reasoning_effort: ReasoningEffort,

    /// Per-request timeout in seconds. Unset means the HTTP client default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Extra headers sent with every upstream request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            temperature: default_temperature(),
            default_reasoning_effort: default_reasoning_effort(),
            timeout_secs: None,
            headers: HashMap::new(),
        }
    }
}

// Keep the key out of debug output.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("temperature", &self.temperature)
            .field("default_reasoning_effort", &self.default_reasoning_effort)
            .field("timeout_secs", &self.timeout_secs)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl UpstreamConfig {
    /// Fill in the API key from the environment if the config file left it out.
    ///
    /// An empty string in either place counts as "not set".
    pub fn resolve_api_key(&mut self) {
        if self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty()) {
            return;
        }
        self.api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty());
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("upstream.base_url must not be empty".into());
        }
        if self.default_model.trim().is_empty() {
            return Err("upstream.default_model must not be empty".into());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "upstream.temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_reasoning_effort() -> ReasoningEffort {
    ReasoningEffort::Medium
}
