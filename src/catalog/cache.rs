//! Lazily refreshed list of chat-capable models.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use super::{
    heuristics::is_chat_model,
    store::CapabilityStore,
    types::{Catalogue, ModelCapability},
};
use crate::{
    call_log::{CallLog, LogStatus, NewLogEntry},
    providers::Upstream,
};

const LIST_ROUTE: &str = "/models";

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The refresh failed and no earlier catalogue exists to fall back on.
    #[error("Model catalogue unavailable: {0}")]
    UpstreamUnavailable(String),
}

/// Catalogue Cache over the [`CapabilityStore`].
///
/// Concurrent misses may each fetch from upstream; the later merge wins.
pub struct CatalogueCache {
    store: Arc<CapabilityStore>,
    upstream: Arc<dyn Upstream>,
    call_log: Arc<CallLog>,
    freshness: Duration,
}

impl CatalogueCache {
    pub fn new(
        store: Arc<CapabilityStore>,
        upstream: Arc<dyn Upstream>,
        call_log: Arc<CallLog>,
        freshness: Duration,
    ) -> Self {
        Self {
            store,
            upstream,
            call_log,
            freshness,
        }
    }

    /// Chat-capable models sorted by id.
    ///
    /// Served from the stored catalogue while it is fresh unless `force_refresh`.
    /// On a failed refresh the previous catalogue is returned however old it is.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self, force_refresh: bool) -> Result<Vec<ModelCapability>, CatalogError> {
        let current = self.store.catalogue().await;

        if !force_refresh
            && let Some(catalogue) = &current
            && catalogue.is_fresh(Utc::now(), self.freshness)
        {
            tracing::debug!(models = catalogue.models.len(), "Serving cached catalogue");
            return Ok(catalogue.models.clone());
        }

        match self.refresh().await {
            Ok(models) => Ok(models),
            Err(message) => match current {
                Some(Catalogue { fetched_at, models }) => {
                    tracing::warn!(
                        error = %message,
                        fetched_at = %fetched_at,
                        "Catalogue refresh failed, serving previous catalogue"
                    );
                    self.call_log.append(
                        NewLogEntry::internal(LIST_ROUTE, LogStatus::Retried)
                            .note("refresh failed; served previous catalogue")
                            .meta(json!({"fetchedAt": fetched_at, "models": models.len()}))
                            .error(message),
                    );
                    Ok(models)
                }
                None => Err(CatalogError::UpstreamUnavailable(message)),
            },
        }
    }

    async fn refresh(&self) -> Result<Vec<ModelCapability>, String> {
        let start = std::time::Instant::now();
        let result = self.upstream.list_models().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let ids = match result {
            Ok(ids) => ids,
            Err(e) => {
                let message = e.upstream_message();
                self.call_log.append(
                    NewLogEntry::upstream("GET", LIST_ROUTE, LogStatus::Error)
                        .duration_ms(duration_ms)
                        .error(message.clone()),
                );
                return Err(message);
            }
        };

        let total = ids.len();
        let fresh: Vec<ModelCapability> = ids
            .into_iter()
            .filter(|id| is_chat_model(id))
            .map(ModelCapability::inferred)
            .collect();

        self.call_log.append(
            NewLogEntry::upstream("GET", LIST_ROUTE, LogStatus::Ok)
                .duration_ms(duration_ms)
                .meta(json!({"total": total, "chat": fresh.len()})),
        );

        let fetched_at = Utc::now();
        if let Err(e) = self.store.merge_catalogue(fresh, fetched_at).await {
            tracing::warn!(error = %e, "Failed to persist model catalogue");
        }

        // The store dedupes and sorts; read back what it now holds.
        Ok(self
            .store
            .catalogue()
            .await
            .map(|c| c.models)
            .unwrap_or_default())
    }
}
