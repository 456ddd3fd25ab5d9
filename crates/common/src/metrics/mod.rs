//! Metrics and observability utilities
//!
//! Prometheus metrics with latency histograms and standardized naming.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all CardForge metrics
pub const METRICS_PREFIX: &str = "cardforge";

/// Histogram buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Buckets for generation latency; LLM calls take seconds, not milliseconds
pub const GENERATION_BUCKETS: &[f64] = &[
    0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0, 90.0,
];

pub fn metric_name(suffix: &str) -> String {
    format!("{}_{}", METRICS_PREFIX, suffix)
}

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        metric_name("requests_total"),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        metric_name("request_duration_seconds"),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        metric_name("generations_total"),
        Unit::Count,
        "Generation attempts by outcome and whether the plain-JSON fallback ran"
    );

    describe_histogram!(
        metric_name("generation_duration_seconds"),
        Unit::Seconds,
        "Time from request to finalized generation"
    );

    describe_histogram!(
        metric_name("generation_proposals"),
        Unit::Count,
        "Proposals returned per successful generation"
    );

    describe_counter!(
        metric_name("generation_errors_total"),
        Unit::Count,
        "Failed generations by logged error code"
    );

    describe_counter!(
        metric_name("flashcards_created_total"),
        Unit::Count,
        "Flashcards persisted, by source"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            metric_name("requests_total"),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            metric_name("request_duration_seconds"),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a finished generation attempt
pub fn record_generation(duration_secs: f64, proposals: usize, success: bool, fallback_used: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        metric_name("generations_total"),
        "status" => status,
        "fallback" => fallback_used.to_string()
    )
    .increment(1);

    if success {
        histogram!(metric_name("generation_duration_seconds")).record(duration_secs);
        histogram!(metric_name("generation_proposals")).record(proposals as f64);
    }
}

/// Record a logged generation failure
pub fn record_generation_error(error_code: &str) {
    counter!(
        metric_name("generation_errors_total"),
        "code" => error_code.to_string()
    )
    .increment(1);
}

/// Record persisted flashcards
pub fn record_flashcards_created(count: usize, source: &str) {
    counter!(
        metric_name("flashcards_created_total"),
        "source" => source.to_string()
    )
    .increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, GENERATION_BUCKETS] {
            assert!(buckets.windows(2).all(|w| w[0] < w[1]));
        }
        // The default generation timeout must fall inside the range
        assert!(GENERATION_BUCKETS.contains(&60.0));
    }

    #[test]
    fn test_recorders_without_exporter() {
        let metrics = RequestMetrics::start("POST", "/v1/generations");
        metrics.finish(200);
        record_generation(1.5, 4, true, false);
        record_generation_error("LLM_HTTP_ERROR");
        record_flashcards_created(3, "ai-full");
        assert_eq!(metric_name("requests_total"), "cardforge_requests_total");
    }
}
