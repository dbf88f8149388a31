//! Metrics instrumentation for snare-dns.
//!
//! All metrics are prefixed with `snare_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::engine::Stage;

/// Record a resolved DNS query.
pub fn record_query(record_type: &str, stage: Stage, duration: std::time::Duration) {
    counter!("snare_dns.query.count", "type" => record_type.to_string(), "stage" => stage.label())
        .increment(1);
    histogram!("snare_dns.query.duration.seconds", "stage" => stage.label())
        .record(duration.as_secs_f64());
}

/// Record a query that failed (upstream unreachable, malformed request).
pub fn record_query_error(record_type: &str, duration: std::time::Duration) {
    counter!("snare_dns.query.count", "type" => record_type.to_string(), "stage" => "error")
        .increment(1);
    histogram!("snare_dns.query.duration.seconds", "stage" => "error")
        .record(duration.as_secs_f64());
}

/// Record a synthetic record appended to the zone.
pub fn record_injection() {
    counter!("snare_dns.injection.count").increment(1);
}

/// Record a mutation step that failed and was skipped.
pub fn record_mutation_failure(step: &'static str) {
    counter!("snare_dns.mutation.failure.count", "step" => step).increment(1);
}

/// Record a classification verdict.
pub fn record_verdict(verdict: &'static str) {
    counter!("snare_dns.classification.verdict.count", "verdict" => verdict).increment(1);
}

/// Record an upstream failure.
pub fn record_upstream_failure(reason: &'static str) {
    counter!("snare_dns.upstream.failure.count", "reason" => reason).increment(1);
}

/// Record the zone size (call periodically or on change).
pub fn record_zone_size(records: usize) {
    gauge!("snare_dns.zone.records").set(records as f64);
}

/// Record classification store sizes.
pub fn record_classification_counts(good: usize, bad: usize) {
    gauge!("snare_dns.classification.good").set(good as f64);
    gauge!("snare_dns.classification.bad").set(bad as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
