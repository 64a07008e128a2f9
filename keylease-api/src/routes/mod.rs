//! REST API Routes Module
//!
//! Route handlers grouped by concern:
//! - Lease operations, one route each, plus the `load-balancing` entry point
//! - Pool status and administration
//! - Chunked uploads
//! - Health checks, Prometheus metrics and the OpenAPI document

pub mod dispatch;
pub mod health;
pub mod lease;
pub mod pool;
pub mod upload;

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use crate::config::ApiConfig;
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use dispatch::create_router as dispatch_router;
pub use health::create_router as health_router;
pub use lease::create_router as lease_router;
pub use pool::create_router as pool_router;
pub use upload::create_router as upload_router;

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// With no configured origins every origin is allowed. Otherwise origins are
/// matched by [`ApiConfig::is_origin_allowed`], which understands `*.domain`.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if !config.is_production() {
        tracing::info!("CORS: Development mode - allowing all origins");
        return cors.allow_origin(Any);
    }

    tracing::info!(origins = ?config.cors_origins, "CORS: restricting origins");
    let allowed = config.clone();
    let cors = cors.allow_origin(AllowOrigin::predicate(
        move |origin: &HeaderValue, _parts| {
            origin
                .to_str()
                .map(|o| allowed.is_origin_allowed(o))
                .unwrap_or(false)
        },
    ));

    if config.cors_allow_credentials {
        cors.allow_credentials(true)
    } else {
        cors
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the complete API router.
///
/// - Lease, pool and upload routes under `/api/v1`
/// - Health checks at `/health/*`
/// - Metrics at `/metrics`
/// - OpenAPI document at `/openapi.json`
///
/// Layers, outermost first: CORS, request tracing, observability, body limit.
pub fn create_api_router(state: AppState, api_config: &ApiConfig) -> Router {
    let api_routes = Router::new()
        .nest("/leases", lease::create_router(state.clone()))
        .nest("/pool", pool::create_router(state.clone()))
        .nest("/uploads", upload::create_router(state.clone()))
        .merge(dispatch::create_router(state.clone()));

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health::create_router(state))
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::max(api_config.max_body_bytes))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(api_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_builds_for_both_modes() {
        let _ = build_cors_layer(&ApiConfig::default());
        let restricted = ApiConfig {
            cors_origins: vec!["https://app.example.com".to_string()],
            cors_allow_credentials: true,
            ..ApiConfig::default()
        };
        let _ = build_cors_layer(&restricted);
    }
}
