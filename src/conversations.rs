//! Conversation transcripts saved by the browser client.
//!
//! Each save writes one file, `<root>/<YYYY-MM-DD>/<YYYYMMDD-HHMMSS>-<id>[.autosave].json`,
//! with the date and time in server local time.

use std::{io, path::PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::atomic_file;

/// Longest conversation id kept from a request.
const MAX_ID_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize conversation: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A save request from the client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveConversation {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Anything other than an array is saved as an empty transcript.
    #[serde(default, deserialize_with = "array_or_empty")]
    pub transcript: Vec<Value>,
    #[serde(default)]
    pub autosave: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationRecord<'a> {
    id: &'a str,
    saved_at: DateTime<Utc>,
    autosave: bool,
    model: &'a str,
    system_prompt: &'a str,
    transcript: &'a [Value],
    stats: ConversationStats,
}

#[derive(Debug, Clone, Serialize)]
struct ConversationStats {
    messages: usize,
}

pub struct ConversationArchive {
    root: PathBuf,
    /// Path prefix stripped from saved paths before reporting them.
    display_base: PathBuf,
    default_model: String,
}

impl ConversationArchive {
    pub fn new(
        root: impl Into<PathBuf>,
        display_base: impl Into<PathBuf>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            display_base: display_base.into(),
            default_model: default_model.into(),
        }
    }

    /// Write `request` and return the saved file's path relative to the
    /// storage directory, with `/` separators.
    #[tracing::instrument(skip_all, fields(autosave = request.autosave))]
    pub async fn save(&self, request: &SaveConversation) -> Result<String, ConversationError> {
        self.save_at(request, Local::now()).await
    }

    async fn save_at(
        &self,
        request: &SaveConversation,
        now: DateTime<Local>,
    ) -> Result<String, ConversationError> {
        let id = request
            .conversation_id
            .as_deref()
            .and_then(sanitize_id)
            .unwrap_or_else(random_id);

        let file_name = format!(
            "{}-{}{}.json",
            now.format("%Y%m%d-%H%M%S"),
            id,
            if request.autosave { ".autosave" } else { "" }
        );
        let path = self
            .root
            .join(now.format("%Y-%m-%d").to_string())
            .join(file_name);

        let record = ConversationRecord {
            id: &id,
            saved_at: now.with_timezone(&Utc),
            autosave: request.autosave,
            model: request
                .model
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(self.default_model.as_str()),
            system_prompt: request.system_prompt.as_deref().unwrap_or_default(),
            transcript: &request.transcript,
            stats: ConversationStats {
                messages: request.transcript.len(),
            },
        };
        let contents = serde_json::to_string_pretty(&record)?;

        atomic_file::write(&path, contents)
            .await
            .map_err(|source| ConversationError::Io {
                path: path.clone(),
                source,
            })?;

        let shown = path.strip_prefix(&self.display_base).unwrap_or(&path);
        let shown = shown
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        tracing::debug!(path = %shown, messages = request.transcript.len(), "Saved conversation");
        Ok(shown)
    }
}

fn array_or_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    })
}

/// Keep only characters safe in a file name. `None` if nothing is left.
fn sanitize_id(raw: &str) -> Option<String> {
    let id: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .take(MAX_ID_LEN)
        .collect();
    (!id.is_empty()).then_some(id)
}

fn random_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
