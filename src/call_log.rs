//! Bounded in-memory record of upstream calls and internal decisions.
//!
//! Every upstream attempt (success or failure) and every notable internal
//! decision (temperature learned, path fallback, missing credential) is
//! appended here so the log surface can reconstruct what happened for a
//! request. The ring is process-lifetime only and evicts oldest-first.
//!
//! Entries are immutable once appended; concurrent appenders see insertion
//! order as observed under the lock.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 300;

/// Whether an entry describes an upstream call or an internal decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Upstream,
    Internal,
}

impl std::str::FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upstream" => Ok(Self::Upstream),
            "internal" => Ok(Self::Internal),
            other => Err(format!("unknown log kind: {other}")),
        }
    }
}

/// Outcome recorded for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Ok,
    /// Failed but recovered locally (e.g. retried without a rejected parameter).
    Retried,
    Error,
}

/// A single call log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub status: LogStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An entry before it is stamped with an id and timestamp.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub kind: LogKind,
    pub route: String,
    pub method: Option<String>,
    pub status: LogStatus,
    pub duration_ms: Option<u64>,
    pub meta: Option<serde_json::Value>,
    pub note: Option<String>,
    pub error: Option<String>,
}

impl NewLogEntry {
    /// An upstream call against `route` (e.g. `POST /responses`).
    pub fn upstream(method: &str, route: impl Into<String>, status: LogStatus) -> Self {
        Self {
            kind: LogKind::Upstream,
            route: route.into(),
            method: Some(method.to_string()),
            status,
            duration_ms: None,
            meta: None,
            note: None,
            error: None,
        }
    }

    /// An internal decision attributed to `route`.
    pub fn internal(route: impl Into<String>, status: LogStatus) -> Self {
        Self {
            kind: LogKind::Internal,
            route: route.into(),
            method: None,
            status,
            duration_ms: None,
            meta: None,
            note: None,
            error: None,
        }
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Query parameters for [`CallLog::query`].
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Maximum entries returned (most recent kept).
    pub limit: usize,
    pub kind: Option<LogKind>,
    /// Only entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// Fixed-capacity ring of [`LogEntry`] values.
pub struct CallLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl Default for CallLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CallLog {
    /// Create an empty log. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry at the tail, evicting from the head on overflow.
    pub fn append(&self, entry: NewLogEntry) -> u64 {
        self.append_at(entry, Utc::now())
    }

    pub(crate) fn append_at(&self, entry: NewLogEntry, timestamp: DateTime<Utc>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = LogEntry {
            id,
            timestamp,
            kind: entry.kind,
            route: entry.route,
            method: entry.method,
            status: entry.status,
            duration_ms: entry.duration_ms,
            meta: entry.meta,
            note: entry.note,
            error: entry.error,
        };

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
        id
    }

    /// Most recent `limit` entries matching the filters, oldest first.
    pub fn query(&self, query: &LogQuery) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let mut matched: Vec<LogEntry> = entries
            .iter()
            .rev()
            .filter(|e| query.kind.is_none_or(|k| e.kind == k))
            .filter(|e| query.since.is_none_or(|since| e.timestamp >= since))
            .take(query.limit)
            .cloned()
            .collect();
        drop(entries);

        matched.reverse();
        matched
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove every entry. Ids keep increasing across clears.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl std::fmt::Debug for CallLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallLog")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
