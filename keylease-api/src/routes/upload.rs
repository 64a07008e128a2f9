//! Chunked Upload REST API Routes
//!
//! Recordings arrive as base64 chunks. Metadata is stored; bytes are
//! forwarded to the upload endpoint in the background.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use crate::{
    error::{ApiError, ApiResult},
    extractors::ApiJson,
    services,
    state::AppState,
    types::{
        ChunkUploadRequest, ChunkUploadResponse, FinalizeUploadRequest, FinalizeUploadResponse,
        UploadProgressResponse,
    },
};

/// POST /api/v1/uploads/chunks - Record one chunk
#[utoipa::path(
    post,
    path = "/api/v1/uploads/chunks",
    tag = "Uploads",
    request_body = ChunkUploadRequest,
    responses(
        (status = 200, description = "Chunk stored, forwarding in background", body = ChunkUploadResponse),
        (status = 400, description = "Missing field, bad position or undecodable payload", body = ApiError),
        (status = 409, description = "Upload already finalized", body = ApiError),
        (status = 413, description = "Chunk exceeds the size limit", body = ApiError),
    ),
)]
pub async fn upload_chunk(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ChunkUploadRequest>,
) -> ApiResult<Json<ChunkUploadResponse>> {
    services::record_chunk(state.store.as_ref(), state.sink.clone(), req, Utc::now())
        .await
        .map(Json)
}

/// POST /api/v1/uploads/finalize - Verify every chunk arrived
#[utoipa::path(
    post,
    path = "/api/v1/uploads/finalize",
    tag = "Uploads",
    request_body = FinalizeUploadRequest,
    responses(
        (status = 200, description = "Upload complete", body = FinalizeUploadResponse),
        (status = 400, description = "Chunks missing; details carry expected and found", body = ApiError),
    ),
)]
pub async fn finalize_upload(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<FinalizeUploadRequest>,
) -> ApiResult<Json<FinalizeUploadResponse>> {
    let record = services::finalize_upload(state.store.as_ref(), req, Utc::now()).await?;
    Ok(Json(FinalizeUploadResponse::from(record)))
}

/// GET /api/v1/uploads/{uploadId} - Progress of an upload
#[utoipa::path(
    get,
    path = "/api/v1/uploads/{uploadId}",
    tag = "Uploads",
    params(
        ("uploadId" = String, Path, description = "Client-chosen upload ID")
    ),
    responses(
        (status = 200, description = "Upload progress", body = UploadProgressResponse),
        (status = 404, description = "Nothing received for this upload", body = ApiError),
    ),
)]
pub async fn upload_progress(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadProgressResponse>> {
    let progress = services::upload_progress(state.store.as_ref(), &upload_id).await?;
    Ok(Json(UploadProgressResponse::from(progress)))
}

/// Create the upload router, mounted at `/api/v1/uploads`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/chunks", post(upload_chunk))
        .route("/finalize", post(finalize_upload))
        .route("/:upload_id", get(upload_progress))
        .with_state(state)
}
