//! Test utilities for exercising the upstream client against wiremock.
//!
//! ```ignore
//! let server = MockServer::start().await;
//! let responder = SequentialResponder::new(vec![
//!     temperature_rejection(),
//!     ResponseTemplate::new(200).set_body_json(chat_completion_body("Hi")),
//! ]);
//! Mock::given(method("POST"))
//!     .and(path("/chat/completions"))
//!     .respond_with(responder.clone())
//!     .mount(&server)
//!     .await;
//!
//! // ... dispatch
//! assert_eq!(responder.call_count(), 2);
//! ```

// Not every helper is used by every test module.
#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering as AtomicOrdering},
};

use serde_json::{Value, json};
use wiremock::{MockServer, ResponseTemplate};

use super::OpenAiUpstream;
use crate::config::UpstreamConfig;

/// Upstream client pointed at `server` with a test key.
pub fn upstream_for(server: &MockServer) -> OpenAiUpstream {
    let config = UpstreamConfig {
        api_key: Some("sk-test".into()),
        base_url: server.uri(),
        ..Default::default()
    };
    OpenAiUpstream::from_config(&config, reqwest::Client::new())
}

/// A Chat Completions success body.
pub fn chat_completion_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
    })
}

/// A Responses API success body using the `output_text` shortcut.
pub fn responses_body(text: &str) -> Value {
    json!({
        "id": "resp-test",
        "object": "response",
        "output_text": text,
        "usage": {"input_tokens": 20, "output_tokens": 8}
    })
}

/// A Responses API success body carrying text only in nested `output` content.
pub fn responses_nested_body(text: &str) -> Value {
    json!({
        "id": "resp-test",
        "object": "response",
        "output": [
            {"type": "reasoning", "summary": []},
            {
                "type": "message",
                "role": "assistant",
                "content": [{"type": "output_text", "text": text, "annotations": []}]
            }
        ],
        "usage": {"input_tokens": 20, "output_tokens": 8, "total_tokens": 30}
    })
}

/// 400 response the upstream returns when a model rejects `temperature`.
pub fn temperature_rejection() -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({
        "error": {
            "message": "Unsupported parameter: 'temperature' is not supported with this model.",
            "type": "invalid_request_error",
            "param": "temperature",
            "code": "unsupported_parameter"
        }
    }))
}

/// 500 response with an OpenAI error body.
pub fn server_error(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(500).set_body_json(json!({
        "error": {"type": "server_error", "message": message, "code": "internal_error"}
    }))
}

/// `GET /models` success body.
pub fn models_body(ids: &[&str]) -> Value {
    json!({
        "object": "list",
        "data": ids
            .iter()
            .map(|id| json!({"id": id, "object": "model", "owned_by": "openai"}))
            .collect::<Vec<_>>()
    })
}

/// JSON bodies of every request the server received on `path`, in order.
pub async fn request_bodies(server: &MockServer, path: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == path)
        .map(|r| serde_json::from_slice(&r.body).unwrap_or(Value::Null))
        .collect()
}

/// Internal state for SequentialResponder, wrapped in Arc for sharing.
struct SequentialResponderState {
    responses: Vec<ResponseTemplate>,
    call_count: AtomicUsize,
}

/// A wiremock responder that returns different responses on successive calls.
///
/// This type is Clone and can be shared to track call counts after mounting.
/// After exhausting the list, it repeats the last response.
#[derive(Clone)]
pub struct SequentialResponder {
    state: Arc<SequentialResponderState>,
}

impl SequentialResponder {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        assert!(
            !responses.is_empty(),
            "SequentialResponder requires at least one response"
        );
        Self {
            state: Arc::new(SequentialResponderState {
                responses,
                call_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Get the number of times this responder has been called.
    pub fn call_count(&self) -> usize {
        self.state.call_count.load(AtomicOrdering::SeqCst)
    }
}

impl wiremock::Respond for SequentialResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let count = self.state.call_count.fetch_add(1, AtomicOrdering::SeqCst);
        let idx = count.min(self.state.responses.len() - 1);
        self.state.responses[idx].clone()
    }
}
