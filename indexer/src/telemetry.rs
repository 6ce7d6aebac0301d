use metrics::{counter, histogram};
use std::time::Instant;

pub struct Telemetry;

impl Telemetry {
    pub fn record_indexed(resource_type: &str) {
        counter!("indexer_documents_indexed_total", "type" => resource_type.to_string())
            .increment(1);
    }

    pub fn record_deleted(resource_type: &str) {
        counter!("indexer_documents_deleted_total", "type" => resource_type.to_string())
            .increment(1);
    }

    pub fn record_failure(operation: &str, kind: &str) {
        counter!("indexer_failures_total", "operation" => operation.to_string(), "kind" => kind.to_string()).increment(1);
    }

    pub fn record_notification(outcome: &str) {
        counter!("indexer_notifications_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_cache_hit() {
        counter!("indexer_cache_hits_total").increment(1);
    }

    pub fn record_cache_miss() {
        counter!("indexer_cache_misses_total").increment(1);
    }

    pub fn record_token_refresh() {
        counter!("indexer_token_refreshes_total").increment(1);
    }

    pub fn record_cascade_hits(resource_type: &str, hits: usize) {
        counter!("indexer_cascade_hits_total", "type" => resource_type.to_string())
            .increment(hits as u64);
    }

    pub fn record_fetch_latency(resource_type: &str, duration_ms: f64) {
        histogram!("indexer_fetch_duration_ms", "type" => resource_type.to_string())
            .record(duration_ms);
    }
}

pub struct FetchTimer {
    start: Instant,
    resource_type: String
}

impl FetchTimer {
    pub fn new(resource_type: &str) -> Self {
        Self {
            start: Instant::now(),
            resource_type: resource_type.to_string()
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed().as_millis() as f64;
        Telemetry::record_fetch_latency(&self.resource_type, duration);
    }
}
