//! Chat dispatch with adaptive parameter retry.
//!
//! A request for a reasoning-family model with a reasoning effort other than
//! `off` goes to the Responses API first; everything else, and any reasoning
//! attempt that fails or yields no text, goes to Chat Completions.
//!
//! On each path `temperature` is sent unless the model is known to reject it.
//! If the upstream rejects it anyway, the fact is stored and the same path is
//! tried once more without it. That rejection never reaches the caller.

mod reply;
mod request;

use std::{sync::Arc, time::Instant};

pub use reply::{Usage, extract_reply, extract_usage};
pub use request::{CallPath, ChatRequest, InboundMessage, ReasoningEffort};
use serde_json::{Value, json};
use thiserror::Error;

use crate::{
    call_log::{CallLog, LogStatus, NewLogEntry},
    catalog::{CapabilityStore, is_reasoning_model},
    config::UpstreamConfig,
    providers::{
        ChatMessage, FailureClass, ProviderError, ReasoningCallRequest, ReasoningOptions,
        StandardCallRequest, Upstream, UpstreamResponse, classify_failure,
    },
    rate_limits::RateLimitSnapshot,
};

/// Route recorded for dispatcher-level log entries.
const CHAT_ROUTE: &str = "/api/chat";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Missing upstream API key")]
    MissingCredential,

    #[error("{0}")]
    UpstreamCallFailure(String),

    #[error("No reply produced")]
    NoReplyProduced,
}

/// Values applied when a request leaves them out.
#[derive(Debug, Clone)]
pub struct DispatchDefaults {
    pub model: String,
    pub temperature: f64,
    pub reasoning_effort: ReasoningEffort,
}

impl From<&UpstreamConfig> for DispatchDefaults {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: config.temperature,
            reasoning_effort: config.default_reasoning_effort,
        }
    }
}

/// A normalised reply.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub reply: String,
    pub usage: Option<Usage>,
    /// Upstream body the reply came from.
    pub raw: Value,
    pub path: CallPath,
    pub model: String,
}

pub struct Dispatcher {
    upstream: Arc<dyn Upstream>,
    store: Arc<CapabilityStore>,
    rate_limits: Arc<RateLimitSnapshot>,
    call_log: Arc<CallLog>,
    defaults: DispatchDefaults,
}

impl Dispatcher {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        store: Arc<CapabilityStore>,
        rate_limits: Arc<RateLimitSnapshot>,
        call_log: Arc<CallLog>,
        defaults: DispatchDefaults,
    ) -> Self {
        Self {
            upstream,
            store,
            rate_limits,
            call_log,
            defaults,
        }
    }

    #[tracing::instrument(skip_all, fields(model = tracing::field::Empty, path = tracing::field::Empty))]
    pub async fn dispatch(&self, request: &ChatRequest) -> Result<DispatchOutcome, DispatchError> {
        if !self.upstream.has_credential() {
            self.call_log.append(
                NewLogEntry::internal(CHAT_ROUTE, LogStatus::Error)
                    .error(DispatchError::MissingCredential.to_string()),
            );
            return Err(DispatchError::MissingCredential);
        }

        let model = request.model().unwrap_or(&self.defaults.model).to_string();
        let effort = request
            .reasoning_effort
            .unwrap_or(self.defaults.reasoning_effort);
        let messages = request.wire_messages();
        tracing::Span::current().record("model", model.as_str());

        if is_reasoning_model(&model) && effort != ReasoningEffort::Off {
            tracing::Span::current().record("path", CallPath::Reasoning.as_str());
            match self
                .run_path(CallPath::Reasoning, &model, &messages, effort)
                .await
            {
                Ok(outcome) if !outcome.reply.trim().is_empty() => return Ok(outcome),
                Ok(_) => {
                    tracing::debug!(model = %model, "Reasoning path returned no text, falling back");
                    self.log_fallback(&model, "reasoning path returned no text", None);
                }
                Err(e) => {
                    tracing::debug!(model = %model, error = %e, "Reasoning path failed, falling back");
                    self.log_fallback(&model, "reasoning path failed", Some(e.upstream_message()));
                }
            }
        }

        tracing::Span::current().record("path", CallPath::Standard.as_str());
        let outcome = self
            .run_path(CallPath::Standard, &model, &messages, effort)
            .await
            .map_err(|e| match e {
                ProviderError::MissingCredential => DispatchError::MissingCredential,
                e => DispatchError::UpstreamCallFailure(e.upstream_message()),
            })?;

        if outcome.reply.trim().is_empty() {
            self.call_log.append(
                NewLogEntry::internal(CHAT_ROUTE, LogStatus::Error)
                    .meta(json!({"model": model}))
                    .error(DispatchError::NoReplyProduced.to_string()),
            );
            return Err(DispatchError::NoReplyProduced);
        }

        Ok(outcome)
    }

    /// Call one path, retrying once without `temperature` if the model rejects it.
    async fn run_path(
        &self,
        path: CallPath,
        model: &str,
        messages: &[ChatMessage],
        effort: ReasoningEffort,
    ) -> Result<DispatchOutcome, ProviderError> {
        let mut include_temperature = self.store.get(model).await.accepts_temperature();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let temperature = include_temperature.then_some(self.defaults.temperature);
            let meta = json!({
                "model": model,
                "path": path,
                "attempt": attempt,
                "temperature": temperature,
            });

            let start = Instant::now();
            let result = self.call(path, model, messages, effort, temperature).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let error = match result {
                Ok(response) => {
                    self.rate_limits.observe(&response.headers);
                    let reply = extract_reply(path, &response.body);
                    let usage = extract_usage(&response.body);

                    self.call_log.append(
                        NewLogEntry::upstream("POST", path.route(), LogStatus::Ok)
                            .duration_ms(duration_ms)
                            .meta(with_usage(meta, usage)),
                    );
                    tracing::debug!(model, path = path.as_str(), attempt, duration_ms, "Upstream call succeeded");

                    return Ok(DispatchOutcome {
                        reply,
                        usage,
                        raw: response.body,
                        path,
                        model: model.to_string(),
                    });
                }
                Err(e) => e,
            };

            if let Some(headers) = error.headers() {
                self.rate_limits.observe(headers);
            }

            if include_temperature && classify_failure(&error) == FailureClass::TemperatureUnsupported {
                self.call_log.append(
                    NewLogEntry::upstream("POST", path.route(), LogStatus::Retried)
                        .duration_ms(duration_ms)
                        .meta(meta)
                        .note("temperature rejected; retrying without it")
                        .error(error.upstream_message()),
                );
                if let Err(e) = self.store.record_temperature_unsupported(model).await {
                    tracing::warn!(model, error = %e, "Failed to persist temperature capability");
                }
                self.call_log.append(
                    NewLogEntry::internal(CHAT_ROUTE, LogStatus::Ok)
                        .meta(json!({"model": model, "supportsTemperature": false}))
                        .note("recorded temperature as unsupported"),
                );

                include_temperature = false;
                continue;
            }

            tracing::warn!(
                model,
                path = path.as_str(),
                attempt,
                duration_ms,
                error = %error,
                "Upstream call failed"
            );
            self.call_log.append(
                NewLogEntry::upstream("POST", path.route(), LogStatus::Error)
                    .duration_ms(duration_ms)
                    .meta(with_status(meta, &error))
                    .error(error.upstream_message()),
            );
            return Err(error);
        }
    }

    async fn call(
        &self,
        path: CallPath,
        model: &str,
        messages: &[ChatMessage],
        effort: ReasoningEffort,
        temperature: Option<f64>,
    ) -> Result<UpstreamResponse, ProviderError> {
        match path {
            CallPath::Reasoning => {
                let request = ReasoningCallRequest {
                    model: model.to_string(),
                    input: messages.to_vec(),
                    reasoning: ReasoningOptions { effort },
                    temperature,
                };
                self.upstream.create_response(&request).await
            }
            CallPath::Standard => {
                let request = StandardCallRequest {
                    model: model.to_string(),
                    messages: messages.to_vec(),
                    temperature,
                };
                self.upstream.create_chat_completion(&request).await
            }
        }
    }

    fn log_fallback(&self, model: &str, note: &str, error: Option<String>) {
        let entry = NewLogEntry::internal(CHAT_ROUTE, LogStatus::Retried)
            .meta(json!({"model": model, "from": CallPath::Reasoning, "to": CallPath::Standard}))
            .note(note);
        self.call_log.append(match error {
            Some(error) => entry.error(error),
            None => entry,
        });
    }
}

fn with_usage(mut meta: Value, usage: Option<Usage>) -> Value {
    if let Some(usage) = usage {
        meta["usage"] = json!(usage);
    }
    meta
}

fn with_status(mut meta: Value, error: &ProviderError) -> Value {
    if let Some(status) = error.status() {
        meta["status"] = json!(status.as_u16());
    }
    meta
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::{
        call_log::{LogKind, LogQuery},
        config::UpstreamConfig,
        providers::{
            OpenAiUpstream,
            test_utils::{
                SequentialResponder, chat_completion_body, request_bodies, responses_body,
                responses_nested_body, server_error, temperature_rejection, upstream_for,
            },
        },
        rate_limits::{REMAINING_REQUESTS, RESET_TOKENS},
    };

    struct Harness {
        dispatcher: Dispatcher,
        store: Arc<CapabilityStore>,
        rate_limits: Arc<RateLimitSnapshot>,
        call_log: Arc<CallLog>,
        _dir: TempDir,
    }

    async fn harness_with(upstream: Arc<dyn Upstream>) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            CapabilityStore::open(dir.path().join("models.jsonl"))
                .await
                .unwrap(),
        );
        let rate_limits = Arc::new(RateLimitSnapshot::new());
        let call_log = Arc::new(CallLog::new(100));
        let dispatcher = Dispatcher::new(
            upstream,
            store.clone(),
            rate_limits.clone(),
            call_log.clone(),
            DispatchDefaults::from(&UpstreamConfig::default()),
        );
        Harness {
            dispatcher,
            store,
            rate_limits,
            call_log,
            _dir: dir,
        }
    }

    async fn harness(server: &MockServer) -> Harness {
        harness_with(Arc::new(upstream_for(server))).await
    }

    fn chat(model: &str, effort: Option<ReasoningEffort>) -> ChatRequest {
        ChatRequest {
            messages: vec![InboundMessage::new("user", "Hello")],
            system_prompt: Some("Be brief.".into()),
            model: Some(model.into()),
            reasoning_effort: effort,
        }
    }

    async fn mount(server: &MockServer, route: &str, responder: SequentialResponder) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(responder)
            .mount(server)
            .await;
    }

    fn ok(body: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(body)
    }

    #[tokio::test]
    async fn test_first_attempt_includes_temperature() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/chat/completions",
            SequentialResponder::new(vec![ok(chat_completion_body("Hi there"))]),
        )
        .await;
        let h = harness(&server).await;

        let outcome = h.dispatcher.dispatch(&chat("gpt-4o-mini", None)).await.unwrap();

        assert_eq!(outcome.reply, "Hi there");
        assert_eq!(outcome.path, CallPath::Standard);
        assert_eq!(outcome.usage.unwrap().total_tokens, 17);

        let bodies = request_bodies(&server, "/chat/completions").await;
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["temperature"], 0.7);
        assert_eq!(bodies[0]["messages"][0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(bodies[0]["messages"][1], json!({"role": "user", "content": "Hello"}));
    }

    #[tokio::test]
    async fn test_default_model_used_when_absent() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/chat/completions",
            SequentialResponder::new(vec![ok(chat_completion_body("Hi"))]),
        )
        .await;
        let h = harness(&server).await;

        let request = ChatRequest {
            messages: vec![InboundMessage::new("user", "Hello")],
            ..Default::default()
        };
        let outcome = h.dispatcher.dispatch(&request).await.unwrap();

        assert_eq!(outcome.model, "gpt-4o-mini");
        assert_eq!(
            request_bodies(&server, "/chat/completions").await[0]["model"],
            "gpt-4o-mini"
        );
    }

    #[tokio::test]
    async fn test_reasoning_temperature_rejection_is_learned_and_retried() {
        let server = MockServer::start().await;
        let responder = SequentialResponder::new(vec![
            temperature_rejection(),
            ok(responses_body("Thought about it")),
        ]);
        mount(&server, "/responses", responder.clone()).await;
        let h = harness(&server).await;

        let outcome = h
            .dispatcher
            .dispatch(&chat("o4-mini", Some(ReasoningEffort::Medium)))
            .await
            .unwrap();

        assert_eq!(outcome.reply, "Thought about it");
        assert_eq!(outcome.path, CallPath::Reasoning);
        assert_eq!(responder.call_count(), 2);
        assert_eq!(h.store.get("o4-mini").await.supports_temperature, Some(false));

        let bodies = request_bodies(&server, "/responses").await;
        assert_eq!(bodies[0]["temperature"], 0.7);
        assert_eq!(bodies[0]["reasoning"]["effort"], "medium");
        assert!(bodies[1].get("temperature").is_none());

        // A later call never sends temperature
        h.dispatcher
            .dispatch(&chat("o4-mini", Some(ReasoningEffort::Medium)))
            .await
            .unwrap();
        let bodies = request_bodies(&server, "/responses").await;
        assert_eq!(bodies.len(), 3);
        assert!(bodies[2].get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_rejection_never_reaches_caller_but_is_logged() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/chat/completions",
            SequentialResponder::new(vec![temperature_rejection(), ok(chat_completion_body("ok"))]),
        )
        .await;
        let h = harness(&server).await;

        h.dispatcher.dispatch(&chat("gpt-4o", None)).await.unwrap();

        let logs = h.call_log.query(&LogQuery {
            limit: 10,
            ..Default::default()
        });
        let statuses: Vec<_> = logs.iter().map(|e| (e.kind, e.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (LogKind::Upstream, LogStatus::Retried),
                (LogKind::Internal, LogStatus::Ok),
                (LogKind::Upstream, LogStatus::Ok),
            ]
        );
        assert_eq!(logs[0].meta.as_ref().unwrap()["attempt"], 1);
        assert_eq!(logs[2].meta.as_ref().unwrap()["attempt"], 2);
    }

    #[tokio::test]
    async fn test_second_rejection_is_not_retried() {
        let server = MockServer::start().await;
        let responder = SequentialResponder::new(vec![temperature_rejection()]);
        mount(&server, "/chat/completions", responder.clone()).await;
        let h = harness(&server).await;

        let err = h.dispatcher.dispatch(&chat("gpt-4o", None)).await.unwrap_err();

        assert_eq!(responder.call_count(), 2);
        assert!(matches!(err, DispatchError::UpstreamCallFailure(ref m) if m.contains("temperature")));
    }

    #[tokio::test]
    async fn test_known_rejection_skips_temperature_on_first_attempt() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/chat/completions",
            SequentialResponder::new(vec![ok(chat_completion_body("ok"))]),
        )
        .await;
        let h = harness(&server).await;
        h.store.record_temperature_unsupported("gpt-5-chat").await.unwrap();

        h.dispatcher
            .dispatch(&chat("gpt-5-chat", Some(ReasoningEffort::Off)))
            .await
            .unwrap();

        let bodies = request_bodies(&server, "/chat/completions").await;
        assert!(bodies[0].get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_effort_off_never_uses_reasoning_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(ok(responses_body("unexpected")))
            .expect(0)
            .mount(&server)
            .await;
        mount(
            &server,
            "/chat/completions",
            SequentialResponder::new(vec![ok(chat_completion_body("standard"))]),
        )
        .await;
        let h = harness(&server).await;

        let outcome = h
            .dispatcher
            .dispatch(&chat("o4-mini", Some(ReasoningEffort::Off)))
            .await
            .unwrap();
        assert_eq!(outcome.path, CallPath::Standard);
        assert_eq!(outcome.reply, "standard");
    }

    #[tokio::test]
    async fn test_reasoning_failure_falls_back_to_standard() {
        let server = MockServer::start().await;
        let reasoning = SequentialResponder::new(vec![server_error("responses unavailable")]);
        mount(&server, "/responses", reasoning.clone()).await;
        mount(
            &server,
            "/chat/completions",
            SequentialResponder::new(vec![ok(chat_completion_body("fallback"))]),
        )
        .await;
        let h = harness(&server).await;

        let outcome = h
            .dispatcher
            .dispatch(&chat("o3", Some(ReasoningEffort::High)))
            .await
            .unwrap();

        assert_eq!(reasoning.call_count(), 1);
        assert_eq!(outcome.path, CallPath::Standard);
        assert_eq!(outcome.reply, "fallback");

        let internal = h.call_log.query(&LogQuery {
            limit: 10,
            kind: Some(LogKind::Internal),
            since: None,
        });
        assert_eq!(internal.len(), 1);
        assert_eq!(internal[0].error.as_deref(), Some("responses unavailable"));
    }

    #[tokio::test]
    async fn test_standard_failure_surfaces_upstream_message() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/chat/completions",
            SequentialResponder::new(vec![server_error("model overloaded")]),
        )
        .await;
        let h = harness(&server).await;

        let err = h.dispatcher.dispatch(&chat("gpt-4o", None)).await.unwrap_err();
        assert!(matches!(err, DispatchError::UpstreamCallFailure(ref m) if m == "model overloaded"));
    }

    #[tokio::test]
    async fn test_empty_replies_on_both_paths_is_no_reply() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/responses",
            SequentialResponder::new(vec![ok(json!({"output": []}))]),
        )
        .await;
        mount(
            &server,
            "/chat/completions",
            SequentialResponder::new(vec![ok(chat_completion_body(""))]),
        )
        .await;
        let h = harness(&server).await;

        let err = h
            .dispatcher
            .dispatch(&chat("o1", Some(ReasoningEffort::Low)))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoReplyProduced));
    }

    #[tokio::test]
    async fn test_nested_reasoning_output_is_extracted() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/responses",
            SequentialResponder::new(vec![ok(responses_nested_body("from segments"))]),
        )
        .await;
        let h = harness(&server).await;

        let outcome = h
            .dispatcher
            .dispatch(&chat("gpt-5", None))
            .await
            .unwrap();
        assert_eq!(outcome.reply, "from segments");
        assert_eq!(outcome.usage.unwrap().total_tokens, 30);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ok(chat_completion_body("unexpected")))
            .expect(0)
            .mount(&server)
            .await;
        let config = UpstreamConfig {
            api_key: None,
            base_url: server.uri(),
            ..Default::default()
        };
        let h = harness_with(Arc::new(OpenAiUpstream::from_config(
            &config,
            reqwest::Client::new(),
        )))
        .await;

        let err = h.dispatcher.dispatch(&chat("gpt-4o", None)).await.unwrap_err();

        assert!(matches!(err, DispatchError::MissingCredential));
        assert_eq!(h.call_log.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_headers_observed_on_success_and_error() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/chat/completions",
            SequentialResponder::new(vec![
                server_error("fail").insert_header(RESET_TOKENS, "3s"),
                ok(chat_completion_body("ok")).insert_header(REMAINING_REQUESTS, "9"),
            ]),
        )
        .await;
        let h = harness(&server).await;

        h.dispatcher.dispatch(&chat("gpt-4o", None)).await.unwrap_err();
        h.dispatcher.dispatch(&chat("gpt-4o", None)).await.unwrap();

        let view = h.rate_limits.current_snapshot(chrono::Utc::now());
        assert_eq!(view.requests.unwrap().remaining, Some(9));
        assert_eq!(view.tokens.unwrap().reset_raw.as_deref(), Some("3s"));
    }
}
