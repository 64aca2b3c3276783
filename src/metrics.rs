//! Prometheus metrics for build orchestration observability.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record the outcome of a build request.
pub fn build_requested(outcome: &str) {
    counter!("drydock_builds_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an artifact-lookup short-circuit hit.
pub fn artifact_cache_hit() {
    counter!("drydock_artifact_cache_hits_total").increment(1);
}

/// Record end-to-end time from request to artifact.
pub fn build_duration(duration_ms: u64) {
    histogram!("drydock_build_duration_ms").record(duration_ms as f64);
}

/// Record a message accepted by a queue backend.
pub fn queue_message_sent(backend: &str) {
    counter!("drydock_queue_sent_total", "backend" => backend.to_string()).increment(1);
}

/// Record a message delivered to a consumer sink.
pub fn queue_message_received(backend: &str) {
    counter!("drydock_queue_received_total", "backend" => backend.to_string()).increment(1);
}

/// Record messages acknowledged in one batch delete.
pub fn queue_messages_deleted(count: usize) {
    counter!("drydock_queue_deleted_total").increment(count as u64);
}

/// Record a recoverable consumer error or recovered panic.
pub fn consumer_error() {
    counter!("drydock_consumer_errors_total").increment(1);
}
