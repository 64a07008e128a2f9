//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in a tracing span and records Prometheus metrics
//! against a normalized route so that IDs do not explode label cardinality.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::metrics::with_metrics;

/// Segments that name a static route rather than an ID.
const STATIC_SEGMENTS: &[&str] = &["chunks", "finalize", "credits", "refresh"];

/// Replace ID-like path segments with `{id}`.
///
/// UUIDs and integers are always IDs. The segment after `uploads` or `keys`
/// is an ID unless it names a static route.
fn normalize_path(path: &str) -> String {
    let mut previous = "";
    let segments: Vec<&str> = path
        .split('/')
        .map(|segment| {
            let is_id = Uuid::parse_str(segment).is_ok()
                || (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
                || (matches!(previous, "uploads" | "keys")
                    && !segment.is_empty()
                    && !STATIC_SEGMENTS.contains(&segment));
            previous = segment;
            if is_id {
                "{id}"
            } else {
                segment
            }
        })
        .collect();
    segments.join("/")
}

/// Observability middleware for Axum.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    with_metrics(|m| {
        m.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        )
    });

    if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/leases/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/leases/{id}");
    }

    #[test]
    fn test_normalize_path_key_index() {
        assert_eq!(normalize_path("/api/v1/pool/keys/3"), "/api/v1/pool/keys/{id}");
    }

    #[test]
    fn test_normalize_path_upload_id() {
        assert_eq!(
            normalize_path("/api/v1/uploads/interview-42-rec"),
            "/api/v1/uploads/{id}"
        );
        assert_eq!(normalize_path("/api/v1/uploads/chunks"), "/api/v1/uploads/chunks");
        assert_eq!(normalize_path("/api/v1/uploads/finalize"), "/api/v1/uploads/finalize");
    }

    #[test]
    fn test_normalize_path_static_routes() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
        assert_eq!(
            normalize_path("/api/v1/pool/credits/refresh"),
            "/api/v1/pool/credits/refresh"
        );
    }
}
