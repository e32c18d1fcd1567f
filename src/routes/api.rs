//! `/api` handlers: chat, model listing, quota telemetry, and the call log.

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    AppState,
    call_log::{LogEntry, LogKind, LogQuery},
    catalog::{CatalogError, ModelCapability},
    dispatch::{ChatRequest, DispatchError, Usage},
    rate_limits::RateLimitView,
};

/// Entries returned by `GET /api/logs` when no limit is given.
pub const DEFAULT_LOG_LIMIT: usize = 100;

/// Error response for API requests, rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::MissingCredential => Self::bad_request(
                "Missing upstream API key. Set OPENAI_API_KEY or upstream.api_key.",
            ),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UpstreamUnavailable(_) => {
                Self::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub usage: Option<Usage>,
    pub raw: Value,
}

/// Dispatch a chat request upstream.
#[tracing::instrument(name = "api.chat", skip(state, payload))]
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;

    let outcome = state.dispatcher.dispatch(&request).await.inspect_err(|e| {
        tracing::warn!(error = %e, "Chat dispatch failed");
    })?;
    tracing::debug!(
        model = %outcome.model,
        path = outcome.path.as_str(),
        "Chat dispatched"
    );

    Ok(Json(ChatResponse {
        reply: outcome.reply,
        usage: outcome.usage,
        raw: outcome.raw,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelsQuery {
    #[serde(default)]
    pub refresh: Option<String>,
}

impl ModelsQuery {
    fn force_refresh(&self) -> bool {
        self.refresh
            .as_deref()
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
    }
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelCapability>,
}

/// List chat-capable models from the catalogue cache.
#[tracing::instrument(name = "api.models", skip(state))]
pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
) -> Result<Json<ModelsResponse>, ApiError> {
    let models = state.catalogue.list(query.force_refresh()).await?;
    Ok(Json(ModelsResponse { models }))
}

/// Most recent upstream quota telemetry.
pub async fn rate_limits(State(state): State<AppState>) -> Json<RateLimitView> {
    Json(state.rate_limits.current_snapshot(Utc::now()))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
    pub kind: Option<String>,
    /// RFC 3339 timestamp or epoch milliseconds.
    pub since: Option<String>,
}

impl LogsQuery {
    fn into_log_query(self, capacity: usize) -> Result<LogQuery, ApiError> {
        let kind = self
            .kind
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(str::parse::<LogKind>)
            .transpose()
            .map_err(ApiError::bad_request)?;

        let since = self
            .since
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(parse_since)
            .transpose()?;

        Ok(LogQuery {
            limit: self.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(capacity),
            kind,
            since,
        })
    }
}

fn parse_since(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| ApiError::bad_request(format!("invalid since timestamp: {raw}")))
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
}

/// Query the call log.
pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let query = query.into_log_query(state.call_log.capacity())?;
    Ok(Json(LogsResponse {
        logs: state.call_log.query(&query),
    }))
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Empty the call log.
pub async fn clear_logs(State(state): State<AppState>) -> Json<OkResponse> {
    state.call_log.clear();
    tracing::info!("Call log cleared");
    Json(OkResponse { ok: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_query_defaults_and_clamps() {
        let query = LogsQuery::default().into_log_query(300).unwrap();
        assert_eq!(query.limit, DEFAULT_LOG_LIMIT);

        let query = LogsQuery {
            limit: Some(10_000),
            ..Default::default()
        }
        .into_log_query(300)
        .unwrap();
        assert_eq!(query.limit, 300);
    }

    #[test]
    fn test_since_accepts_rfc3339_and_epoch_millis() {
        let a = parse_since("2025-06-01T12:00:00Z").unwrap();
        let b = parse_since(&a.timestamp_millis().to_string()).unwrap();
        assert_eq!(a, b);
        assert!(parse_since("yesterday").is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = LogsQuery {
            kind: Some("bogus".into()),
            ..Default::default()
        }
        .into_log_query(300)
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_dispatch_error_status_mapping() {
        assert_eq!(
            ApiError::from(DispatchError::MissingCredential).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(DispatchError::NoReplyProduced).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let err = ApiError::from(DispatchError::UpstreamCallFailure("boom".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_refresh_flag_parsing() {
        let q = |v: &str| ModelsQuery {
            refresh: Some(v.into()),
        };
        assert!(q("true").force_refresh());
        assert!(q("1").force_refresh());
        assert!(!q("false").force_refresh());
        assert!(!ModelsQuery::default().force_refresh());
    }
}
