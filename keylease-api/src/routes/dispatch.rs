//! Load-Balancing Route
//!
//! Older clients send every lease operation to one endpoint and pick the
//! operation with an `action` field. The body is decoded into
//! [`LoadBalancingRequest`] and dispatched to the same services the
//! dedicated lease routes use.

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;

use crate::{
    error::{ApiError, ApiResult},
    extractors::ApiJson,
    services,
    state::AppState,
    types::{
        AllocateResponse, CleanupResponse, DeallocateResponse, HeartbeatResponse,
        LoadBalancingRequest, LoadBalancingResponse,
    },
};

/// POST /api/v1/load-balancing - Run the lease operation named by `action`
///
/// The body is read as raw JSON first so that an unknown `action` is
/// reported as `INVALID_INPUT` like any other malformed field.
#[utoipa::path(
    post,
    path = "/api/v1/load-balancing",
    tag = "Leases",
    request_body = LoadBalancingRequest,
    responses(
        (status = 200, description = "Operation result, shaped by action", body = LoadBalancingResponse),
        (status = 400, description = "Unknown action or invalid fields", body = ApiError),
        (status = 404, description = "Heartbeat for an inactive lease", body = ApiError),
        (status = 429, description = "Every key is at capacity", body = ApiError),
    ),
)]
pub async fn load_balancing(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<serde_json::Value>,
) -> ApiResult<Json<LoadBalancingResponse>> {
    let request: LoadBalancingRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::invalid_input(format!("Invalid load-balancing request: {}", e)))?;
    dispatch(&state, request).await.map(Json)
}

/// Run one decoded request.
pub async fn dispatch(
    state: &AppState,
    request: LoadBalancingRequest,
) -> ApiResult<LoadBalancingResponse> {
    let store = state.store.as_ref();
    let now = Utc::now();

    match request {
        LoadBalancingRequest::Allocate(req) => {
            let lease = services::allocate_lease(store, &state.policy, req, now).await?;
            Ok(LoadBalancingResponse::Allocate(AllocateResponse::from(&lease)))
        }
        LoadBalancingRequest::Heartbeat(req) => {
            let lease =
                services::renew_lease(store, &state.policy, req.session_id.as_deref(), now)
                    .await?;
            Ok(LoadBalancingResponse::Heartbeat(HeartbeatResponse::from_lease(
                &lease, now,
            )))
        }
        LoadBalancingRequest::Deallocate(req) => {
            let outcome = services::release_lease(store, req.session_id.as_deref(), now).await?;
            Ok(LoadBalancingResponse::Deallocate(DeallocateResponse {
                success: true,
                released: outcome.released(),
            }))
        }
        LoadBalancingRequest::Cleanup => {
            let reclaimed = services::reclaim_expired(store, &state.policy, now).await?;
            Ok(LoadBalancingResponse::Cleanup(CleanupResponse::new(
                reclaimed, now,
            )))
        }
    }
}

/// Create the load-balancing router, merged into `/api/v1`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/load-balancing", post(load_balancing))
        .with_state(state)
}
