//! Observability infrastructure for the gateway
//!
//! Provides:
//! - Prometheus metrics (mutation outcomes and attempts, aggregation latency,
//!   backend errors, HTTP requests)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, Histogram,
    HistogramVec, IntCounterVec,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Error;
use crate::models::{AppliedChange, Operation, WorkloadRef};

/// Latency buckets for aggregation round trips (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Buckets for submissions per mutation
const ATTEMPT_BUCKETS: &[f64] = &[1.0, 2.0, 3.0, 4.0, 5.0, 7.0, 10.0];

static GLOBAL_METRICS: OnceLock<OpsMetricsInner> = OnceLock::new();

struct OpsMetricsInner {
    mutations_total: IntCounterVec,
    mutation_attempts: Histogram,
    aggregation_latency_seconds: HistogramVec,
    gateway_errors_total: IntCounterVec,
    http_requests_total: IntCounterVec,
}

impl OpsMetricsInner {
    fn new() -> Self {
        Self {
            mutations_total: register_int_counter_vec!(
                "opsgate_mutations_total",
                "Workload mutations by operation and outcome",
                &["operation", "outcome"]
            )
            .expect("Failed to register mutations_total"),

            mutation_attempts: register_histogram!(
                "opsgate_mutation_attempts",
                "Conditional-update submissions needed per mutation",
                ATTEMPT_BUCKETS.to_vec()
            )
            .expect("Failed to register mutation_attempts"),

            aggregation_latency_seconds: register_histogram_vec!(
                "opsgate_aggregation_latency_seconds",
                "Time spent fanning out and joining metric queries",
                &["dimension"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register aggregation_latency_seconds"),

            gateway_errors_total: register_int_counter_vec!(
                "opsgate_gateway_errors_total",
                "Errors returned by downstream gateways",
                &["gateway", "kind"]
            )
            .expect("Failed to register gateway_errors_total"),

            http_requests_total: register_int_counter_vec!(
                "opsgate_http_requests_total",
                "HTTP requests served",
                &["method", "path", "status"]
            )
            .expect("Failed to register http_requests_total"),
        }
    }
}

/// Handle to the process-wide gateway metrics.
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct OpsMetrics {
    _private: (),
}

impl Default for OpsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OpsMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OpsMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OpsMetricsInner {
        GLOBAL_METRICS.get_or_init(OpsMetricsInner::new)
    }

    pub fn record_mutation(&self, operation: Operation, outcome: &str) {
        self.inner()
            .mutations_total
            .with_label_values(&[operation.as_str(), outcome])
            .inc();
    }

    pub fn observe_attempts(&self, attempts: u32) {
        self.inner().mutation_attempts.observe(attempts as f64);
    }

    pub fn observe_aggregation_latency(&self, dimension: &str, duration_secs: f64) {
        self.inner()
            .aggregation_latency_seconds
            .with_label_values(&[dimension])
            .observe(duration_secs);
    }

    pub fn inc_gateway_error(&self, gateway: &str, err: &Error) {
        self.inner()
            .gateway_errors_total
            .with_label_values(&[gateway, err.kind()])
            .inc();
    }

    pub fn inc_http_request(&self, method: &str, path: &str, status: u16) {
        self.inner()
            .http_requests_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
    }
}

/// Structured logger for gateway events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a mutation whose conditional update landed
    pub fn log_mutation(&self, change: &AppliedChange) {
        info!(
            event = "workload_mutated",
            instance = %self.instance,
            operation = %change.operation,
            namespace = %change.namespace,
            name = %change.name,
            attempts = change.attempts,
            detail = ?change.detail,
            "Workload mutated"
        );
    }

    pub fn log_mutation_failure(&self, operation: Operation, target: &WorkloadRef, err: &Error) {
        warn!(
            event = "mutation_failed",
            instance = %self.instance,
            operation = %operation,
            namespace = %target.namespace,
            name = %target.name,
            kind = err.kind(),
            error = %err,
            "Workload mutation failed"
        );
    }

    pub fn log_aggregation(&self, dimension: &str, entities: usize, elapsed: Duration) {
        info!(
            event = "metrics_aggregated",
            instance = %self.instance,
            dimension = %dimension,
            entities = entities,
            elapsed_ms = elapsed.as_millis() as u64,
            "Metrics aggregated"
        );
    }

    pub fn log_startup(&self, version: &str, listen_addr: &str, metrics_backend: &str) {
        info!(
            event = "gateway_started",
            instance = %self.instance,
            version = %version,
            listen_addr = %listen_addr,
            metrics_backend = %metrics_backend,
            "Operations gateway started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "gateway_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Operations gateway shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeDetail;

    #[test]
    fn test_ops_metrics_creation() {
        // Global registry: repeated construction must reuse the same metrics
        let metrics = OpsMetrics::new();
        let again = OpsMetrics::new();

        metrics.record_mutation(Operation::Scale, "success");
        again.record_mutation(Operation::Scale, "success");
        metrics.observe_attempts(2);
        metrics.observe_aggregation_latency("pod", 0.02);
        metrics.inc_gateway_error("prometheus", &Error::Unavailable("down".into()));
        metrics.inc_http_request("GET", "/healthz", 200);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "opsgate_mutations_total"));
    }

    #[test]
    fn test_structured_logger_events() {
        let logger = StructuredLogger::new("gw-0");
        assert_eq!(logger.instance, "gw-0");

        let change = AppliedChange {
            name: "web".into(),
            namespace: "default".into(),
            operation: Operation::Scale,
            attempts: 1,
            detail: ChangeDetail::Scaled { from: 1, to: 3 },
        };
        logger.log_mutation(&change);
        logger.log_mutation_failure(
            Operation::Scale,
            &WorkloadRef::new("default", "web"),
            &Error::NotFound("web".into()),
        );
    }
}
