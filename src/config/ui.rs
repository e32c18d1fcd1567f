use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Bundled browser client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UiConfig {
    /// Serve the client at `/`. API routes take precedence.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding `index.html` and its assets.
    #[serde(default = "default_assets_path")]
    pub assets_path: PathBuf,

    /// Cache control header for static assets.
    #[serde(default = "default_cache_control")]
    pub cache_control: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            assets_path: default_assets_path(),
            cache_control: default_cache_control(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_assets_path() -> PathBuf {
    PathBuf::from("public")
}

fn default_cache_control() -> String {
    "no-cache".to_string()
}

/// Prompt library and conversation archive storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Root for `prompts.json`, `default_prompt.json` and `conversations/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn prompts_path(&self) -> PathBuf {
        self.data_dir.join("prompts.json")
    }

    pub fn default_prompt_path(&self) -> PathBuf {
        self.data_dir.join("default_prompt.json")
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.data_dir.join("conversations")
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
