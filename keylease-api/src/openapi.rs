//! OpenAPI Specification for KEYLEASE API
//!
//! Generated by utoipa from the route annotations and wire types.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::{dispatch, health, lease, pool, upload};
use crate::types::*;

/// OpenAPI document for the KEYLEASE API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "KEYLEASE API",
        description = "Leases on a shared pool of rate-limited voice API keys, and chunked recording uploads"
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Leases", description = "Allocate, heartbeat, release and sweep key leases"),
        (name = "Pool", description = "Key pool status and administration"),
        (name = "Uploads", description = "Chunked recording uploads"),
        (name = "Health", description = "Liveness and readiness checks"),
        (name = "Observability", description = "Prometheus metrics"),
    ),
    paths(
        lease::allocate,
        lease::heartbeat,
        lease::deallocate,
        lease::cleanup,
        dispatch::load_balancing,
        pool::pool_status,
        pool::set_key_active,
        pool::refresh_credits,
        upload::upload_chunk,
        upload::finalize_upload,
        upload::upload_progress,
        health::ping,
        health::liveness,
        health::readiness,
        crate::telemetry::metrics::metrics_handler,
    ),
    components(schemas(
        ApiError,
        ErrorCode,
        AllocateRequest,
        AllocateResponse,
        HeartbeatRequest,
        HeartbeatResponse,
        DeallocateRequest,
        DeallocateResponse,
        ReclaimedLeaseResponse,
        CleanupResponse,
        LoadBalancingRequest,
        LoadBalancingResponse,
        PoolKeyResponse,
        PoolStatusResponse,
        SetKeyActiveRequest,
        CreditRefreshStatus,
        CreditRefreshEntry,
        CreditRefreshResponse,
        ChunkUploadRequest,
        ChunkUploadResponse,
        FinalizeUploadRequest,
        FinalizeUploadResponse,
        UploadProgressResponse,
        health::HealthResponse,
        health::HealthStatus,
        health::HealthDetails,
        health::ComponentHealth,
    ))
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}
