use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;

use super::{
    ModelsResponse, ProviderError, ReasoningCallRequest, StandardCallRequest, Upstream,
    UpstreamResponse,
};
use crate::config::UpstreamConfig;

/// Client for an OpenAI-compatible API.
pub struct OpenAiUpstream {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    headers: HashMap<String, String>,
    timeout: Option<Duration>,
}

impl OpenAiUpstream {
    pub fn from_config(config: &UpstreamConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: config
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers: config.headers.clone(),
            timeout: config.timeout(),
        }
    }

    /// Build a request with auth, static headers, and the optional timeout.
    fn build_request(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential)?;

        let request = request.header(AUTHORIZATION, format!("Bearer {}", api_key));
        let request = self.headers.iter().fold(request, |req, (key, value)| {
            req.header(key.as_str(), value.as_str())
        });

        Ok(match self.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        })
    }

    /// Check response status and extract the OpenAI error message on failure.
    ///
    /// OpenAI returns errors as `{"error": {"message": "...", "type": "...", "code": "..."}}`.
    async fn check_response(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("(empty body)"));

        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .unwrap_or(body);

        Err(ProviderError::Api {
            status,
            message,
            headers,
        })
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<UpstreamResponse, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let body = serde_json::to_vec(payload).map_err(|e| ProviderError::Decode(e.to_string()))?;

        let response = self
            .build_request(self.client.post(&url))?
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(UpstreamResponse { body, headers })
    }
}

#[async_trait]
impl Upstream for OpenAiUpstream {
    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    #[tracing::instrument(
        skip(self, request),
        fields(provider = "openai", operation = "responses", model = %request.model)
    )]
    async fn create_response(
        &self,
        request: &ReasoningCallRequest,
    ) -> Result<UpstreamResponse, ProviderError> {
        self.post_json("/responses", request).await
    }

    #[tracing::instrument(
        skip(self, request),
        fields(provider = "openai", operation = "chat_completion", model = %request.model)
    )]
    async fn create_chat_completion(
        &self,
        request: &StandardCallRequest,
    ) -> Result<UpstreamResponse, ProviderError> {
        self.post_json("/chat/completions", request).await
    }

    #[tracing::instrument(skip(self), fields(provider = "openai", operation = "list_models"))]
    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);

        let response = self.build_request(self.client.get(&url))?.send().await?;
        let response = Self::check_response(response).await?;
        let models: ModelsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}
