use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Model catalogue and capability persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    /// JSON Lines file holding the catalogue and learned capability facts.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// How long a fetched catalogue is served without asking upstream again.
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            freshness_secs: default_freshness_secs(),
        }
    }
}

impl CatalogConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/model_catalog.jsonl")
}

fn default_freshness_secs() -> u64 {
    24 * 60 * 60
}

/// In-memory call log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallLogConfig {
    /// Maximum number of entries kept; the oldest are evicted first.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CallLogConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    crate::call_log::DEFAULT_CAPACITY
}
