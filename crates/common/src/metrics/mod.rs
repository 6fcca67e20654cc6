//! Metrics and observability utilities
//!
//! Records search, per-backend and embedding metrics through the `metrics`
//! facade with standardized naming conventions. Installing an exporter is
//! left to the embedding application; without one every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all Lodestar metrics
pub const METRICS_PREFIX: &str = "lodestar";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of hybrid search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Hybrid search latency in seconds"
    );

    describe_histogram!(
        format!("{}_search_results", METRICS_PREFIX),
        Unit::Count,
        "Number of results returned per search"
    );

    describe_histogram!(
        format!("{}_backend_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Per-backend retrieval latency in seconds"
    );

    describe_histogram!(
        format!("{}_backend_results", METRICS_PREFIX),
        Unit::Count,
        "Results returned by a single backend"
    );

    describe_counter!(
        format!("{}_backend_degraded_total", METRICS_PREFIX),
        Unit::Count,
        "Backend failures or timeouts absorbed during a search"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record a completed hybrid search
pub fn record_search(duration_secs: f64, outcome: &str, result_count: usize) {
    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_search_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    histogram!(format!("{}_search_results", METRICS_PREFIX)).record(result_count as f64);
}

/// Helper to record one backend call inside a search
pub fn record_backend(backend: &str, duration_secs: f64, result_count: usize) {
    histogram!(
        format!("{}_backend_duration_seconds", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .record(duration_secs);

    histogram!(
        format!("{}_backend_results", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .record(result_count as f64);
}

/// Helper to record a backend failure that was absorbed
pub fn record_degraded(backend: &str, reason: &str) {
    counter!(
        format!("{}_backend_degraded_total", METRICS_PREFIX),
        "backend" => backend.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}
