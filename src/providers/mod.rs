//! # Upstream provider
//!
//! The [`Upstream`] trait is the seam between the dispatcher / catalogue and
//! the language-model API. [`OpenAiUpstream`] talks to any OpenAI-compatible
//! endpoint over reqwest; tests swap in a wiremock server behind it.
//!
//! Two call shapes are supported: the Responses API (`POST /responses`), used
//! for reasoning models, and Chat Completions (`POST /chat/completions`). Both
//! return the raw JSON body plus response headers; normalisation happens in
//! `crate::dispatch`.

pub mod error;
mod open_ai;
#[cfg(test)]
pub mod test_utils;

use async_trait::async_trait;
pub use error::{FailureClass, ProviderError, classify_failure, is_temperature_unsupported};
use http::HeaderMap;
pub use open_ai::OpenAiUpstream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::ReasoningEffort;

/// A single message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Body of a `POST /chat/completions` call.
#[derive(Debug, Clone, Serialize)]
pub struct StandardCallRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReasoningOptions {
    pub effort: ReasoningEffort,
}

/// Body of a `POST /responses` call.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningCallRequest {
    pub model: String,
    pub input: Vec<ChatMessage>,
    pub reasoning: ReasoningOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// A successful upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub body: Value,
    pub headers: HeaderMap,
}

/// `GET /models` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub data: Vec<ModelObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelObject {
    pub id: String,
}

/// Operations the engine needs from the upstream provider.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Whether an API key is available. Calls without one fail with
    /// [`ProviderError::MissingCredential`] before anything is sent.
    fn has_credential(&self) -> bool;

    /// Reasoning-oriented call (`POST /responses`).
    async fn create_response(
        &self,
        request: &ReasoningCallRequest,
    ) -> Result<UpstreamResponse, ProviderError>;

    /// Standard completion call (`POST /chat/completions`).
    async fn create_chat_completion(
        &self,
        request: &StandardCallRequest,
    ) -> Result<UpstreamResponse, ProviderError>;

    /// Ids of every model visible to the API key.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;
}
