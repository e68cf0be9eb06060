//! Parser invocation metrics.
//!
//! Recorded through the `metrics` facade. When `enable_metrics` is set, axum-prometheus installs
//! the global Prometheus recorder and these series are rendered at `/internal/metrics` alongside
//! the HTTP metrics; otherwise the calls are no-ops.

use std::time::Duration;

pub const PARSER_INVOCATIONS_TOTAL: &str = "invoicectl_parser_invocations_total";
pub const PARSER_DURATION_SECONDS: &str = "invoicectl_parser_duration_seconds";

/// Record one finished parser invocation, labelled by outcome.
pub fn record_parser_invocation(outcome: &'static str, elapsed: Duration) {
    metrics::counter!(PARSER_INVOCATIONS_TOTAL, "outcome" => outcome).increment(1);
    metrics::histogram!(PARSER_DURATION_SECONDS, "outcome" => outcome).record(elapsed.as_secs_f64());
}
