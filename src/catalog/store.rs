//! Durable model capability store.
//!
//! State lives in memory and is written through to a JSON Lines file on every
//! mutation: one `catalogue` header record carrying the fetch time and the
//! listed ids, then one `model` record per known id. Writes go to a sibling temp file which is renamed
//! over the state file, so a crash mid-write leaves the previous state intact.

use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use super::types::{Catalogue, ModelCapability, StateRecord};
use crate::atomic_file;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize capability state: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Default)]
struct StoreState {
    /// Set once a catalogue has been merged; absent means none was ever fetched.
    fetched_at: Option<DateTime<Utc>>,
    /// Ids in the last fetched catalogue.
    listed: BTreeSet<String>,
    /// Every id with known capabilities, listed or not.
    models: BTreeMap<String, ModelCapability>,
}

impl StoreState {
    fn render(&self) -> StoreResult<String> {
        let mut out = String::new();
        if let Some(fetched_at) = self.fetched_at {
            let header = StateRecord::Catalogue {
                fetched_at,
                listed: self.listed.iter().cloned().collect(),
            };
            out.push_str(&serde_json::to_string(&header)?);
            out.push('\n');
        }
        for model in self.models.values() {
            out.push_str(&serde_json::to_string(&StateRecord::Model(model.clone()))?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Mapping from model id to known capabilities, persisted across restarts.
#[derive(Debug)]
pub struct CapabilityStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl CapabilityStore {
    /// Open the store at `path`, loading any existing state.
    ///
    /// A missing file yields an empty store. Lines that fail to parse are
    /// skipped with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let state = load_state(&path).await?;

        tracing::debug!(
            path = %path.display(),
            models = state.models.len(),
            has_catalogue = state.fetched_at.is_some(),
            "Loaded capability store"
        );

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Known capabilities for `id`, or inferred defaults if the id is unknown.
    pub async fn get(&self, id: &str) -> ModelCapability {
        self.state
            .read()
            .await
            .models
            .get(id)
            .cloned()
            .unwrap_or_else(|| ModelCapability::inferred(id))
    }

    /// The persisted catalogue, if one was ever fetched. Ids known only
    /// through [`Self::record_temperature_unsupported`] are not part of it.
    pub async fn catalogue(&self) -> Option<Catalogue> {
        let state = self.state.read().await;
        state.fetched_at.map(|fetched_at| Catalogue {
            fetched_at,
            models: state
                .listed
                .iter()
                .map(|id| {
                    state
                        .models
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| ModelCapability::inferred(id.as_str()))
                })
                .collect(),
        })
    }

    /// Permanently mark `id` as rejecting the `temperature` parameter.
    /// Catalogue membership is unchanged.
    ///
    /// The in-memory fact is updated even if the write fails; the error only
    /// reports that it may not survive a restart.
    pub async fn record_temperature_unsupported(&self, id: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let entry = state
            .models
            .entry(id.to_string())
            .or_insert_with(|| ModelCapability::inferred(id));

        if entry.supports_temperature == Some(false) {
            return Ok(());
        }
        entry.supports_temperature = Some(false);

        tracing::info!(model = %id, "Recorded temperature as unsupported");
        self.persist(&state).await
    }

    /// Replace the model set with `fresh`, fetched at `fetched_at`.
    ///
    /// Ids absent from `fresh` are dropped. A `supports_temperature = false`
    /// fact already recorded for an id carries over. Duplicate ids in `fresh`
    /// collapse to one entry. As with [`Self::record_temperature_unsupported`],
    /// memory is updated regardless of the write outcome.
    pub async fn merge_catalogue(
        &self,
        fresh: Vec<ModelCapability>,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;

        let mut merged = BTreeMap::new();
        for mut model in fresh {
            let learned = state
                .models
                .get(&model.id)
                .and_then(|prev| prev.supports_temperature);
            if learned == Some(false) {
                model.supports_temperature = Some(false);
            }
            merged.insert(model.id.clone(), model);
        }

        let dropped = state
            .models
            .keys()
            .filter(|id| !merged.contains_key(*id))
            .count();

        state.listed = merged.keys().cloned().collect();
        state.models = merged;
        state.fetched_at = Some(fetched_at);

        tracing::debug!(
            models = state.models.len(),
            dropped,
            "Merged model catalogue"
        );
        self.persist(&state).await
    }

    async fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let contents = state.render()?;
        atomic_file::write(&self.path, contents)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

async fn load_state(path: &Path) -> StoreResult<StoreState> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreState::default()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut state = StoreState::default();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<StateRecord>(line) {
            Ok(StateRecord::Catalogue { fetched_at, listed }) => {
                state.fetched_at = Some(fetched_at);
                state.listed = listed.into_iter().collect();
            }
            Ok(StateRecord::Model(model)) => {
                state.models.insert(model.id.clone(), model);
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping unreadable capability record"
                );
            }
        }
    }
    Ok(state)
}
