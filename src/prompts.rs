//! Named system prompts and the default prompt, kept as pretty-printed JSON
//! files under the storage directory.
//!
//! `prompts.json` maps name to [`Prompt`]; `default_prompt.json` holds one
//! [`DefaultPrompt`] or `null`. A file that is missing or unreadable reads as
//! empty; the next write replaces it.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::atomic_file;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Name is required")]
    MissingName,

    #[error("Content must be a string")]
    MissingContent,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize prompts: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PromptError {
    /// Whether the caller sent something invalid, as opposed to a storage failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MissingName | Self::MissingContent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub name: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultPrompt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

pub struct PromptStore {
    prompts_path: PathBuf,
    default_path: PathBuf,
    /// Serialises read-modify-write cycles on the prompt map.
    write_lock: Mutex<()>,
}

impl PromptStore {
    pub fn new(prompts_path: impl Into<PathBuf>, default_path: impl Into<PathBuf>) -> Self {
        Self {
            prompts_path: prompts_path.into(),
            default_path: default_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Saved prompts, most recently updated first.
    pub async fn list(&self) -> Vec<Prompt> {
        let mut prompts: Vec<_> = self.read_map().await.into_values().collect();
        prompts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        prompts
    }

    /// Create or overwrite the prompt called `name` (trimmed).
    #[tracing::instrument(skip(self, content))]
    pub async fn save(
        &self,
        name: Option<&str>,
        content: Option<String>,
    ) -> Result<Prompt, PromptError> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(PromptError::MissingName)?;
        let content = content.ok_or(PromptError::MissingContent)?;

        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await;
        let prompt = Prompt {
            name: name.to_string(),
            content,
            updated_at: Utc::now(),
        };
        map.insert(prompt.name.clone(), prompt.clone());
        self.write_json(&self.prompts_path, &map).await?;

        tracing::info!(prompts = map.len(), "Saved prompt");
        Ok(prompt)
    }

    /// Remove the prompt called exactly `name`. Unknown names are not an error.
    pub async fn delete(&self, name: &str) -> Result<(), PromptError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await;
        if map.remove(name).is_none() {
            return Ok(());
        }
        self.write_json(&self.prompts_path, &map).await?;
        tracing::info!(name, "Deleted prompt");
        Ok(())
    }

    pub async fn default_prompt(&self) -> Option<DefaultPrompt> {
        read_json::<Option<DefaultPrompt>>(&self.default_path)
            .await
            .flatten()
    }

    /// Replace the default prompt. A blank `name` is dropped.
    pub async fn set_default(
        &self,
        name: Option<&str>,
        content: Option<String>,
    ) -> Result<DefaultPrompt, PromptError> {
        let content = content.ok_or(PromptError::MissingContent)?;
        let record = DefaultPrompt {
            name: name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from),
            content,
            updated_at: Utc::now(),
        };

        let _guard = self.write_lock.lock().await;
        self.write_json(&self.default_path, &Some(&record)).await?;
        Ok(record)
    }

    async fn read_map(&self) -> BTreeMap<String, Prompt> {
        read_json(&self.prompts_path).await.unwrap_or_default()
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), PromptError> {
        let contents = serde_json::to_string_pretty(value)?;
        atomic_file::write(path, contents)
            .await
            .map_err(|source| PromptError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read prompt file");
            return None;
        }
    };
    if raw.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&raw)
        .inspect_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable prompt file");
        })
        .ok()
}
