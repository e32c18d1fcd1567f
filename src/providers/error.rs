//! Upstream error types and failure classification.

use http::{HeaderMap, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("No upstream API key configured")]
    MissingCredential,

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx response. Headers are kept so quota telemetry on rejected
    /// calls is still observed.
    #[error("Upstream API error ({status}): {message}")]
    Api {
        status: StatusCode,
        message: String,
        headers: HeaderMap,
    },

    #[error("Failed to decode upstream response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// The message to surface to callers: the upstream's own text for API
    /// errors, the full description otherwise.
    pub fn upstream_message(&self) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Response headers, when the upstream answered at all.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::Api { headers, .. } => Some(headers),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_temperature_rejection(&self) -> bool {
        matches!(self, Self::Api { message, .. } if is_temperature_unsupported(message))
    }
}

/// How the dispatcher should react to a failed upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The model rejected the `temperature` parameter; retry without it.
    TemperatureUnsupported,
    /// Anything else.
    Other,
}

pub fn classify_failure(error: &ProviderError) -> FailureClass {
    if error.is_temperature_rejection() {
        FailureClass::TemperatureUnsupported
    } else {
        FailureClass::Other
    }
}

/// Whether an upstream error message says `temperature` is not accepted.
///
/// Matches on wording ("Unsupported parameter: 'temperature'...",
/// "'temperature' does not support 0.7 with this model. Only the default (1)
/// value is supported."), so a rephrased upstream message will be missed.
/// Keep every wording check here.
pub fn is_temperature_unsupported(message: &str) -> bool {
    const REJECTION_PHRASES: &[&str] = &[
        "unsupported",
        "not supported",
        "does not support",
        "only the default",
    ];

    let message = message.to_ascii_lowercase();
    message.contains("temperature") && REJECTION_PHRASES.iter().any(|p| message.contains(p))
}
