//! Prometheus Metrics Definitions
//!
//! Lease lifecycle, chunk upload and HTTP metrics, exposed at `/metrics`
//! for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_gauge,
    CounterVec, Encoder, HistogramVec, IntCounter, IntGauge, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<KeyleaseMetrics>> = Lazy::new(KeyleaseMetrics::new);

/// Container for all KEYLEASE metrics.
#[derive(Clone)]
pub struct KeyleaseMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Allocation attempts - labels: outcome (granted/exhausted/error)
    pub lease_allocations_total: CounterVec,

    /// Leases released by their holder
    pub lease_releases_total: IntCounter,

    /// Heartbeats - labels: outcome (renewed/not_found)
    pub lease_renewals_total: CounterVec,

    /// Leases expired by a sweep
    pub leases_reclaimed_total: IntCounter,

    /// Counter repairs made by reconciliation
    pub lease_count_corrections_total: IntCounter,

    /// Active leases seen by the last pool status read or sweep
    pub active_leases: IntGauge,

    /// Chunk uploads - labels: outcome (stored/forwarded/forward_failed/rejected)
    pub chunk_uploads_total: CounterVec,
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl KeyleaseMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "keylease_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "keylease_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            lease_allocations_total: register_counter_vec!(
                "keylease_lease_allocations_total",
                "Lease allocation attempts by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_error("lease_allocations_total", e))?,

            lease_releases_total: register_int_counter!(
                "keylease_lease_releases_total",
                "Leases released by their holder"
            )
            .map_err(|e| registration_error("lease_releases_total", e))?,

            lease_renewals_total: register_counter_vec!(
                "keylease_lease_renewals_total",
                "Lease heartbeats by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_error("lease_renewals_total", e))?,

            leases_reclaimed_total: register_int_counter!(
                "keylease_leases_reclaimed_total",
                "Leases expired after missing heartbeats"
            )
            .map_err(|e| registration_error("leases_reclaimed_total", e))?,

            lease_count_corrections_total: register_int_counter!(
                "keylease_lease_count_corrections_total",
                "Pool counters repaired by reconciliation"
            )
            .map_err(|e| registration_error("lease_count_corrections_total", e))?,

            active_leases: register_int_gauge!(
                "keylease_active_leases",
                "Active leases across the pool"
            )
            .map_err(|e| registration_error("active_leases", e))?,

            chunk_uploads_total: register_counter_vec!(
                "keylease_chunk_uploads_total",
                "Chunk uploads by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_error("chunk_uploads_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_allocation(&self, outcome: &str) {
        self.lease_allocations_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_release(&self) {
        self.lease_releases_total.inc();
    }

    pub fn record_renewal(&self, renewed: bool) {
        let outcome = if renewed { "renewed" } else { "not_found" };
        self.lease_renewals_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_reclaimed(&self, count: usize) {
        self.leases_reclaimed_total.inc_by(count as u64);
    }

    pub fn record_corrections(&self, count: usize) {
        self.lease_count_corrections_total.inc_by(count as u64);
    }

    pub fn set_active_leases(&self, count: i64) {
        self.active_leases.set(count);
    }

    pub fn record_chunk(&self, outcome: &str) {
        self.chunk_uploads_total.with_label_values(&[outcome]).inc();
    }
}

/// Run `f` against the global metrics if they registered successfully.
pub fn with_metrics(f: impl FnOnce(&KeyleaseMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    // Touch the registry so the first scrape is not empty
    let _ = METRICS.as_ref();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
