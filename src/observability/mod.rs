//! Observability: structured logging via `tracing`.
//!
//! The call log (`crate::call_log`) is the in-process, queryable record of
//! upstream traffic; this module configures the operator-facing log stream.

mod tracing_init;

pub use tracing_init::*;
