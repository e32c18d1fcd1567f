//! Model catalogue and learned capability facts.
//!
//! [`CapabilityStore`] is the durable id → [`ModelCapability`] map, including
//! facts learned from upstream rejections. [`CatalogueCache`] keeps the list of
//! chat-capable models, refreshing it from upstream at most once per freshness
//! window and falling back to the last stored list when a refresh fails.
//!
//! # Usage
//!
//! ```rust,ignore
//! let store = Arc::new(CapabilityStore::open("data/model_catalog.jsonl").await?);
//! let cache = CatalogueCache::new(store.clone(), upstream, call_log, freshness);
//!
//! let models = cache.list(false).await?;
//! if !store.get("o4-mini").await.accepts_temperature() {
//!     // omit temperature
//! }
//! ```

mod cache;
pub mod heuristics;
mod store;
mod types;

pub use cache::{CatalogError, CatalogueCache};
pub use heuristics::{is_chat_model, is_reasoning_model};
pub use store::{CapabilityStore, StoreError, StoreResult};
pub use types::{Catalogue, ModelCapability};
