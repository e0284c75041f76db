// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for query-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `query_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `resource`: contracts, redemptions, ...
//! - `outcome`: success, error, cancelled, hit, miss
//! - `method`: GET, POST, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// QUERY CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache read that was served fresh (hit) or needed a fetch (miss)
pub fn record_cache_lookup(resource: &str, hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(
        "query_sync_cache_lookups_total",
        "resource" => resource.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a completed fetch (after retries)
pub fn record_fetch(resource: &str, outcome: &str) {
    counter!(
        "query_sync_fetches_total",
        "resource" => resource.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record fetch latency, retries included
pub fn record_fetch_latency(resource: &str, duration: Duration) {
    histogram!(
        "query_sync_fetch_seconds",
        "resource" => resource.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a consumer that joined an in-flight fetch instead of starting one
pub fn record_fetch_deduplicated(resource: &str) {
    counter!(
        "query_sync_fetches_deduplicated_total",
        "resource" => resource.to_string()
    )
    .increment(1);
}

/// Record a response dropped because a newer request for the key had started
pub fn record_stale_response_discarded(resource: &str) {
    counter!(
        "query_sync_stale_responses_discarded_total",
        "resource" => resource.to_string()
    )
    .increment(1);
}

/// Record entries marked stale by an invalidation
pub fn record_invalidation(resource: &str, entries: usize) {
    counter!(
        "query_sync_invalidated_entries_total",
        "resource" => resource.to_string()
    )
    .increment(entries as u64);
}

/// Record entries removed by garbage collection
pub fn record_gc_eviction(count: usize) {
    counter!("query_sync_gc_evictions_total").increment(count as u64);
}

/// Set current number of cache entries
pub fn set_cache_entries(count: usize) {
    gauge!("query_sync_cache_entries").set(count as f64);
}

/// Record a retry of a failed operation
pub fn record_retry(operation: &str) {
    counter!(
        "query_sync_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// MUTATIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Record a mutation outcome
pub fn record_mutation(name: &str, outcome: &str) {
    counter!(
        "query_sync_mutations_total",
        "mutation" => name.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record mutation latency
pub fn record_mutation_latency(name: &str, duration: Duration) {
    histogram!(
        "query_sync_mutation_seconds",
        "mutation" => name.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// POLLING
// ═══════════════════════════════════════════════════════════════════════════

/// Record a polling tick and how it went
pub fn record_poll_tick(resource: &str, outcome: &str) {
    counter!(
        "query_sync_poll_ticks_total",
        "resource" => resource.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set the current polling interval (grows under backoff)
pub fn set_poll_interval(resource: &str, interval: Duration) {
    gauge!(
        "query_sync_poll_interval_seconds",
        "resource" => resource.to_string()
    )
    .set(interval.as_secs_f64());
}

/// Record a suspicious-activity alert
pub fn record_activity_alert(resource: &str, entries: usize) {
    counter!(
        "query_sync_activity_alerts_total",
        "resource" => resource.to_string()
    )
    .increment(1);
    counter!(
        "query_sync_activity_alert_entries_total",
        "resource" => resource.to_string()
    )
    .increment(entries as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════════════════════════

/// Record an HTTP request by status class or error kind
pub fn record_http_request(method: &str, outcome: &str) {
    counter!(
        "query_sync_http_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record HTTP round-trip latency
pub fn record_http_latency(method: &str, duration: Duration) {
    histogram!(
        "query_sync_http_request_seconds",
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records fetch latency on drop
pub struct LatencyTimer {
    resource: String,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_fetch_latency(&self.resource, self.start.elapsed());
    }
}
