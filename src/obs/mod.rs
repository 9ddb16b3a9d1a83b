//! Observability: `tracing` spans around commit/retry/store round-trips,
//! plus a `MetricsSink` trait for attempt/retry counters
//! (`icydb_core::obs::sink::MetricsSink` shape, backed by `tracing`
//! instead of an IC-specific counter store).

use std::time::Duration;

///
/// MetricsSink
///
/// Receives counters from the transaction and batcher layers. The default
/// [`TracingSink`] just emits `tracing` events; a deployment that wants
/// real metrics (e.g. a Prometheus exporter) implements this trait and
/// passes it in via `ClientConfig`.
///

pub trait MetricsSink: Send + Sync {
    fn commit_attempt(&self, table: &str, op_count: usize) {
        let _ = (table, op_count);
    }

    fn commit_retry(&self, table: &str, attempt: u32, delay: Duration) {
        let _ = (table, attempt, delay);
    }

    fn commit_succeeded(&self, table: &str, attempts: u32) {
        let _ = (table, attempts);
    }

    fn commit_failed(&self, table: &str, attempts: u32) {
        let _ = (table, attempts);
    }
}

/// Default sink: routes every counter through `tracing` at an appropriate
/// level. Zero-cost when no subscriber is installed.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn commit_attempt(&self, table: &str, op_count: usize) {
        tracing::debug!(table, op_count, "commit attempt");
    }

    fn commit_retry(&self, table: &str, attempt: u32, delay: Duration) {
        tracing::warn!(table, attempt, delay_ms = delay.as_millis() as u64, "commit retry");
    }

    fn commit_succeeded(&self, table: &str, attempts: u32) {
        tracing::debug!(table, attempts, "commit succeeded");
    }

    fn commit_failed(&self, table: &str, attempts: u32) {
        tracing::error!(table, attempts, "commit failed after exhausting retries");
    }
}
