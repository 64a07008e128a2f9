//! KEYLEASE Telemetry - Observability Infrastructure
//!
//! Structured logging via tracing-subscriber and Prometheus metrics for the
//! API layer. Nothing here needs an external collector to work.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, KeyleaseMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, LogFormat, TelemetryConfig};
