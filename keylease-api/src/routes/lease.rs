//! Lease REST API Routes
//!
//! One route per lease operation. Each handler validates, calls the lease
//! service and shapes the response; the store does the atomic work.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use chrono::Utc;
use keylease_core::LeasePolicy;

use crate::{
    error::{ApiError, ApiResult},
    extractors::ApiJson,
    services,
    state::{AppState, SharedStore},
    types::{
        AllocateRequest, AllocateResponse, CleanupResponse, DeallocateRequest,
        DeallocateResponse, HeartbeatRequest, HeartbeatResponse,
    },
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/leases/allocate - Lease a slot on the least recently used key
#[utoipa::path(
    post,
    path = "/api/v1/leases/allocate",
    tag = "Leases",
    request_body = AllocateRequest,
    responses(
        (status = 201, description = "Lease issued", body = AllocateResponse),
        (status = 400, description = "Missing candidateId or interviewId", body = ApiError),
        (status = 429, description = "Every key is at capacity", body = ApiError),
        (status = 500, description = "Datastore failure", body = ApiError),
    ),
)]
pub async fn allocate(
    State(store): State<SharedStore>,
    State(policy): State<LeasePolicy>,
    ApiJson(req): ApiJson<AllocateRequest>,
) -> ApiResult<impl IntoResponse> {
    let lease = services::allocate_lease(store.as_ref(), &policy, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(AllocateResponse::from(&lease))))
}

/// POST /api/v1/leases/heartbeat - Keep a lease alive
#[utoipa::path(
    post,
    path = "/api/v1/leases/heartbeat",
    tag = "Leases",
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Lease renewed", body = HeartbeatResponse),
        (status = 400, description = "Missing or malformed sessionId", body = ApiError),
        (status = 404, description = "Lease unknown, closed or past its ceiling", body = ApiError),
    ),
)]
pub async fn heartbeat(
    State(store): State<SharedStore>,
    State(policy): State<LeasePolicy>,
    ApiJson(req): ApiJson<HeartbeatRequest>,
) -> ApiResult<Json<HeartbeatResponse>> {
    let now = Utc::now();
    let lease =
        services::renew_lease(store.as_ref(), &policy, req.session_id.as_deref(), now).await?;
    Ok(Json(HeartbeatResponse::from_lease(&lease, now)))
}

/// POST /api/v1/leases/deallocate - Release a lease
///
/// Releasing an unknown or already closed lease succeeds with
/// `released: false`.
#[utoipa::path(
    post,
    path = "/api/v1/leases/deallocate",
    tag = "Leases",
    request_body = DeallocateRequest,
    responses(
        (status = 200, description = "Lease released (or already inactive)", body = DeallocateResponse),
        (status = 400, description = "Missing or malformed sessionId", body = ApiError),
    ),
)]
pub async fn deallocate(
    State(store): State<SharedStore>,
    ApiJson(req): ApiJson<DeallocateRequest>,
) -> ApiResult<Json<DeallocateResponse>> {
    let outcome =
        services::release_lease(store.as_ref(), req.session_id.as_deref(), Utc::now()).await?;
    Ok(Json(DeallocateResponse {
        success: true,
        released: outcome.released(),
    }))
}

/// POST /api/v1/leases/cleanup - Expire stale leases now
#[utoipa::path(
    post,
    path = "/api/v1/leases/cleanup",
    tag = "Leases",
    responses(
        (status = 200, description = "Sweep finished", body = CleanupResponse),
        (status = 500, description = "Datastore failure", body = ApiError),
    ),
)]
pub async fn cleanup(
    State(store): State<SharedStore>,
    State(policy): State<LeasePolicy>,
) -> ApiResult<Json<CleanupResponse>> {
    let now = Utc::now();
    let reclaimed = services::reclaim_expired(store.as_ref(), &policy, now).await?;
    Ok(Json(CleanupResponse::new(reclaimed, now)))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the lease router, mounted at `/api/v1/leases`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/allocate", post(allocate))
        .route("/heartbeat", post(heartbeat))
        .route("/deallocate", post(deallocate))
        .route("/cleanup", post(cleanup))
        .with_state(state)
}
