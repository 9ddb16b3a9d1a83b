//! Client configuration (`spec.md` §6 "Environment").
//!
//! Carries the connection parameters the transaction engine needs but does
//! not itself interpret: table name, region/endpoint, an optional
//! accelerated cache endpoint (DAX-style), and a debug-export flag gating
//! test-only constructors. None of this is consulted by `EntityDescriptor`
//! (see `DESIGN.md`'s Open Question 2) — configuration and schema are
//! deliberately orthogonal.

use crate::obs::{MetricsSink, TracingSink};
use std::sync::Arc;

///
/// ClientConfig
///
/// Connection and default-policy configuration for one deployment. `debug`
/// enables debug-only exports (private constructors, test helpers),
/// mirroring the teacher's `cfg(test)`-gated debug surface but decided at
/// runtime since this crate is a library, not a canister build.
///

#[derive(Clone)]
pub struct ClientConfig {
    pub table_name: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub accelerated_cache_endpoint: Option<String>,
    pub debug: bool,
    pub default_retries: u32,
    pub default_initial_backoff_ms: u64,
    pub default_max_backoff_ms: u64,
    pub metrics: Arc<dyn MetricsSink>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(table_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            region: region.into(),
            endpoint: None,
            accelerated_cache_endpoint: None,
            debug: false,
            default_retries: 3,
            default_initial_backoff_ms: 40,
            default_max_backoff_ms: 1_000,
            metrics: Arc::new(TracingSink),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_accelerated_cache_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.accelerated_cache_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("table_name", &self.table_name)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("accelerated_cache_endpoint", &self.accelerated_cache_endpoint)
            .field("debug", &self.debug)
            .field("default_retries", &self.default_retries)
            .field("default_initial_backoff_ms", &self.default_initial_backoff_ms)
            .field("default_max_backoff_ms", &self.default_max_backoff_ms)
            .finish_non_exhaustive()
    }
}
