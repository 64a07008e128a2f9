//! Pool REST API Routes
//!
//! Read-only status of the key pool plus the two administrative operations:
//! toggling a key and refreshing credit balances. Key material never leaves
//! the process.

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use keylease_core::{KeyIndex, LeasePolicy};

use crate::{
    error::{ApiError, ApiResult},
    extractors::ApiJson,
    services,
    state::{AppState, SharedStore},
    types::{CreditRefreshResponse, PoolKeyResponse, PoolStatusResponse, SetKeyActiveRequest},
};

/// GET /api/v1/pool - Every key with its lease count and credit balance
#[utoipa::path(
    get,
    path = "/api/v1/pool",
    tag = "Pool",
    responses(
        (status = 200, description = "Pool snapshot", body = PoolStatusResponse),
        (status = 500, description = "Datastore failure", body = ApiError),
    ),
)]
pub async fn pool_status(
    State(store): State<SharedStore>,
    State(policy): State<LeasePolicy>,
) -> ApiResult<Json<PoolStatusResponse>> {
    services::pool_status(store.as_ref(), &policy).await.map(Json)
}

/// PUT /api/v1/pool/keys/{keyIndex} - Enable or disable a key
///
/// Disabling a key stops new allocations on it; leases already issued run
/// until released or reclaimed.
#[utoipa::path(
    put,
    path = "/api/v1/pool/keys/{keyIndex}",
    tag = "Pool",
    params(
        ("keyIndex" = i32, Path, description = "Pool key index")
    ),
    request_body = SetKeyActiveRequest,
    responses(
        (status = 200, description = "Key updated", body = PoolKeyResponse),
        (status = 404, description = "Index is not part of the pool", body = ApiError),
    ),
)]
pub async fn set_key_active(
    State(store): State<SharedStore>,
    Path(key_index): Path<KeyIndex>,
    ApiJson(req): ApiJson<SetKeyActiveRequest>,
) -> ApiResult<Json<PoolKeyResponse>> {
    let resource =
        services::set_key_active(store.as_ref(), key_index, req.is_active, Utc::now()).await?;
    Ok(Json(PoolKeyResponse::from(resource)))
}

/// POST /api/v1/pool/credits/refresh - Fetch remaining credits per key
#[utoipa::path(
    post,
    path = "/api/v1/pool/credits/refresh",
    tag = "Pool",
    responses(
        (status = 200, description = "Per-key refresh results", body = CreditRefreshResponse),
        (status = 503, description = "No voice provider configured", body = ApiError),
    ),
)]
pub async fn refresh_credits(State(state): State<AppState>) -> ApiResult<Json<CreditRefreshResponse>> {
    let usage = state
        .usage
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("No voice provider keys are configured"))?;
    services::refresh_credits(state.store.as_ref(), usage.as_ref(), Utc::now())
        .await
        .map(Json)
}

/// Create the pool router, mounted at `/api/v1/pool`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(pool_status))
        .route("/keys/:key_index", put(set_key_active))
        .route("/credits/refresh", post(refresh_credits))
        .with_state(state)
}
