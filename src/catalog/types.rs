use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::heuristics::is_reasoning_model;

/// Known capability flags for one upstream model id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCapability {
    pub id: String,
    pub supports_chat: bool,
    pub supports_reasoning: bool,
    /// `None` until the upstream has rejected the parameter, then `Some(false)`
    /// for good. Nothing ever records `Some(true)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_temperature: Option<bool>,
}

impl ModelCapability {
    /// Capabilities assumed for an id nothing is known about yet.
    pub fn inferred(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            supports_reasoning: is_reasoning_model(&id),
            supports_chat: true,
            supports_temperature: None,
            id,
        }
    }

    /// Whether a call should include `temperature`. Unknown counts as yes.
    pub fn accepts_temperature(&self) -> bool {
        self.supports_temperature != Some(false)
    }
}

/// The list of chat-capable models and when it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalogue {
    pub fetched_at: DateTime<Utc>,
    /// Sorted by id, no duplicates.
    pub models: Vec<ModelCapability>,
}

impl Catalogue {
    pub fn is_fresh(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        now - self.fetched_at < window
    }
}

/// One line of the persisted state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum StateRecord {
    Catalogue {
        #[serde(rename = "fetchedAt")]
        fetched_at: DateTime<Utc>,
        /// Ids the upstream listed at `fetched_at`. Model records outside this
        /// set carry learned facts only.
        #[serde(default)]
        listed: Vec<String>,
    },
    Model(ModelCapability),
}
