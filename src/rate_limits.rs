//! Most recent upstream quota telemetry.
//!
//! The upstream reports request and token quotas in response headers
//! (`x-ratelimit-{remaining,limit,reset}-{requests,tokens}`). Each observation
//! overwrites only the fields it carries, so a response exposing only token
//! headers leaves the request bucket at its last observed values.
//!
//! Reset values are either duration tokens (`"2s"`, `"500ms"`, `"6m0s"`) or
//! absolute timestamps. They are converted to a relative countdown at
//! observation time; queries report the countdown remaining at query time.

use chrono::{DateTime, TimeDelta, Utc};
use http::HeaderMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;

pub const REMAINING_REQUESTS: &str = "x-ratelimit-remaining-requests";
pub const LIMIT_REQUESTS: &str = "x-ratelimit-limit-requests";
pub const RESET_REQUESTS: &str = "x-ratelimit-reset-requests";
pub const REMAINING_TOKENS: &str = "x-ratelimit-remaining-tokens";
pub const LIMIT_TOKENS: &str = "x-ratelimit-limit-tokens";
pub const RESET_TOKENS: &str = "x-ratelimit-reset-tokens";

/// Header names for one bucket.
struct BucketHeaders {
    remaining: &'static str,
    limit: &'static str,
    reset: &'static str,
}

const REQUEST_HEADERS: BucketHeaders = BucketHeaders {
    remaining: REMAINING_REQUESTS,
    limit: LIMIT_REQUESTS,
    reset: RESET_REQUESTS,
};

const TOKEN_HEADERS: BucketHeaders = BucketHeaders {
    remaining: REMAINING_TOKENS,
    limit: LIMIT_TOKENS,
    reset: RESET_TOKENS,
};

#[derive(Debug, Clone, Default)]
struct BucketState {
    observed: bool,
    remaining: Option<i64>,
    limit: Option<i64>,
    reset_raw: Option<String>,
    reset_ms: Option<i64>,
    /// When `reset_ms` was computed; the countdown runs from here.
    reset_observed_at: Option<DateTime<Utc>>,
}

impl BucketState {
    /// Apply the fields present in `headers`. Returns whether anything was present.
    fn apply(&mut self, headers: &HeaderMap, names: &BucketHeaders, now: DateTime<Utc>) -> bool {
        let mut touched = false;

        if let Some(value) = header_str(headers, names.remaining) {
            touched = true;
            if let Some(n) = parse_count(value) {
                self.remaining = Some(n);
            }
        }

        if let Some(value) = header_str(headers, names.limit) {
            touched = true;
            if let Some(n) = parse_count(value) {
                self.limit = Some(n);
            }
        }

        if let Some(value) = header_str(headers, names.reset) {
            touched = true;
            self.reset_raw = Some(value.to_string());
            match parse_reset(value, now) {
                Some(ms) => {
                    self.reset_ms = Some(ms);
                    self.reset_observed_at = Some(now);
                }
                None => {
                    tracing::debug!(value, header = names.reset, "Unparseable rate-limit reset value");
                }
            }
        }

        self.observed |= touched;
        touched
    }

    fn view(&self, now: DateTime<Utc>) -> Option<RateLimitBucket> {
        if !self.observed {
            return None;
        }

        let reset_ms = match (self.reset_ms, self.reset_observed_at) {
            (Some(ms), Some(at)) => {
                let elapsed = (now - at).num_milliseconds().max(0);
                Some((ms - elapsed).max(0))
            }
            (ms, _) => ms,
        };
        let reset_at = reset_ms
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|remaining| now.checked_add_signed(remaining));

        Some(RateLimitBucket {
            remaining: self.remaining,
            limit: self.limit,
            reset_raw: self.reset_raw.clone(),
            reset_ms,
            reset_at,
        })
    }
}

/// One quota bucket as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitBucket {
    pub remaining: Option<i64>,
    pub limit: Option<i64>,
    pub reset_raw: Option<String>,
    /// Milliseconds until the bucket resets, as of the query time.
    pub reset_ms: Option<i64>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub reset_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitView {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub server_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated: Option<DateTime<Utc>>,
    pub requests: Option<RateLimitBucket>,
    pub tokens: Option<RateLimitBucket>,
}

#[derive(Debug, Default)]
struct SnapshotState {
    requests: BucketState,
    tokens: BucketState,
    last_updated: Option<DateTime<Utc>>,
}

/// Process-lifetime record of the latest quota telemetry from any response.
#[derive(Debug, Default)]
pub struct RateLimitSnapshot {
    state: RwLock<SnapshotState>,
}

impl RateLimitSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the quota headers present in `headers`.
    pub fn observe(&self, headers: &HeaderMap) {
        self.observe_at(headers, Utc::now());
    }

    /// Record the quota headers present in `headers` as of `now`.
    pub fn observe_at(&self, headers: &HeaderMap, now: DateTime<Utc>) {
        let mut state = self.state.write();
        let requests = state.requests.apply(headers, &REQUEST_HEADERS, now);
        let tokens = state.tokens.apply(headers, &TOKEN_HEADERS, now);
        if requests || tokens {
            state.last_updated = Some(now);
        }
    }

    pub fn current_snapshot(&self, now: DateTime<Utc>) -> RateLimitView {
        let state = self.state.read();
        RateLimitView {
            server_time: now,
            last_updated: state.last_updated,
            requests: state.requests.view(now),
            tokens: state.tokens.view(now),
        }
    }
}

/// Header names in `HeaderMap` are case-insensitive, so lookups by the
/// lowercase constants match any casing the upstream used.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_count(value: &str) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|f| f as i64))
}

/// Longest reset accepted from a header. Anything further out is treated as
/// unparseable.
const MAX_RESET_MS: i64 = 366 * 24 * 3_600_000;

static DURATION_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ms|h|m|s)").expect("valid regex"));

/// Parse a reset value into milliseconds from `now`.
///
/// Accepts duration tokens (`"12s"`, `"500ms"`, `"1m"`, `"6m0s"`, `"1h2m3.5s"`),
/// RFC 3339 / RFC 2822 timestamps, and bare epoch seconds or milliseconds.
/// Absolute times in the past yield zero. Returns `None` when nothing matches
/// or the reset lies more than [`MAX_RESET_MS`] ahead.
pub fn parse_reset(raw: &str, now: DateTime<Utc>) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let ms = match parse_duration_ms(raw) {
        Some(ms) => ms,
        None => parse_absolute(raw)?
            .signed_duration_since(now)
            .num_milliseconds()
            .max(0),
    };
    (ms <= MAX_RESET_MS).then_some(ms)
}

/// Parse a concatenation of `<number><unit>` parts covering the whole string.
fn parse_duration_ms(raw: &str) -> Option<i64> {
    let mut total = 0.0_f64;
    let mut cursor = 0;

    for cap in DURATION_PART.captures_iter(raw) {
        let whole = cap.get(0)?;
        if whole.start() != cursor {
            return None;
        }
        cursor = whole.end();

        let value: f64 = cap[1].parse().ok()?;
        let unit_ms = match &cap[2] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return None,
        };
        total += value * unit_ms;
    }

    if cursor == 0 || cursor != raw.len() || !total.is_finite() {
        return None;
    }
    let total = total.round();
    (total <= MAX_RESET_MS as f64).then_some(total as i64)
}

fn parse_absolute(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let n: i64 = raw.parse().ok()?;
    if n >= 1_000_000_000_000 {
        DateTime::from_timestamp_millis(n)
    } else if n >= 1_000_000_000 {
        DateTime::from_timestamp(n, 0)
    } else {
        None
    }
}
