//! Prometheus metrics for the statistics service

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    /// Counter: cache operations (hit/miss/write/store_error/invalidated)
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec!(
        "ges_stats_cache_operations_total",
        "Cache operations by type",
        &["operation"]
    )
    .expect("Failed to create cache_operations metric");

    /// Histogram: time spent computing values on cache misses (seconds)
    pub static ref SUPPLIER_DURATION: Histogram = register_histogram!(
        "ges_stats_supplier_duration_seconds",
        "Duration of cache-miss computations",
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    )
    .expect("Failed to create supplier_duration metric");

    /// Counter: statistics requests by entity type and outcome
    pub static ref STATS_REQUESTS: CounterVec = register_counter_vec!(
        "ges_stats_requests_total",
        "Statistics requests by entity type and outcome",
        &["entity_type", "outcome"]
    )
    .expect("Failed to create stats_requests metric");

    /// Gauge: entries held by the cache store at the last sweep
    pub static ref CACHE_ENTRIES: Gauge = register_gauge!(
        "ges_stats_cache_entries",
        "Entries in the cache store"
    )
    .expect("Failed to create cache_entries metric");
}

/// Count `n` cache operations of one kind
pub fn record_cache_operations(operation: &str, n: u64) {
    if n > 0 {
        CACHE_OPERATIONS
            .with_label_values(&[operation])
            .inc_by(n as f64);
    }
}

pub fn observe_supplier_duration(elapsed: Duration) {
    SUPPLIER_DURATION.observe(elapsed.as_secs_f64());
}

/// Record a statistics request ("ok" or "error")
pub fn record_stats_request(entity_type: &str, outcome: &str) {
    STATS_REQUESTS
        .with_label_values(&[entity_type, outcome])
        .inc();
}

pub fn set_cache_entries(count: usize) {
    CACHE_ENTRIES.set(count as f64);
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> crate::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| crate::StatsError::Other(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| crate::StatsError::Other(format!("Metrics are not UTF-8: {}", e)))
}
