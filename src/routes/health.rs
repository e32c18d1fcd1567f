//! Liveness endpoint.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub ok: bool,
    /// Whether an upstream API key is configured. Chat calls fail fast without one.
    pub has_api_key: bool,
}

#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        ok: true,
        has_api_key: state.upstream.has_credential(),
    })
}
