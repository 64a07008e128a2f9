//! Upload Service
//!
//! Chunked recording uploads. Chunk metadata goes to the store keyed by
//! `(uploadId, chunkIndex)`; the decoded bytes are pushed to the chunk sink
//! in a background task so the caller is not held up by the forward.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use keylease_core::{
    validate_chunk_position, verify_complete, ChunkRecord, ChunkSink, ChunkUpload, Timestamp,
    UploadError, UploadProgress, UploadRecord, DEFAULT_CONTENT_TYPE,
};
use keylease_storage::ChunkStore;
use std::sync::Arc;

use crate::constants::MAX_CHUNK_BASE64_BYTES;
use crate::error::{ApiError, ApiResult};
use crate::telemetry::metrics::with_metrics;
use crate::types::{ChunkUploadRequest, ChunkUploadResponse, FinalizeUploadRequest};

// ============================================================================
// BASE64 HANDLING
// ============================================================================

/// Bring client base64 into the standard padded alphabet.
///
/// Strips a `data:...;base64,` prefix, drops whitespace, maps the URL-safe
/// alphabet (`-_`) to the standard one (`+/`) and restores `=` padding.
pub fn normalize_base64(raw: &str) -> String {
    let body = match raw.trim_start().strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, b)| b).unwrap_or(rest),
        None => raw,
    };

    let mut out: String = body
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    while out.ends_with('=') {
        out.pop();
    }
    let remainder = out.len() % 4;
    if remainder != 0 {
        out.extend(std::iter::repeat('=').take(4 - remainder));
    }
    out
}

/// Size-check, normalize and decode one chunk payload.
pub fn decode_chunk(raw: &str) -> Result<Vec<u8>, UploadError> {
    if raw.len() > MAX_CHUNK_BASE64_BYTES {
        return Err(UploadError::ChunkTooLarge {
            size: raw.len(),
            limit: MAX_CHUNK_BASE64_BYTES,
        });
    }
    STANDARD
        .decode(normalize_base64(raw))
        .map_err(|e| UploadError::InvalidPayload {
            reason: e.to_string(),
        })
}

fn required<T>(value: Option<T>, field: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::missing_field(field))
}

fn required_text(value: Option<String>, field: &str) -> ApiResult<String> {
    let value = required(value, field)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::missing_field(field));
    }
    Ok(trimmed.to_string())
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// Store one chunk's metadata and forward its bytes in the background.
///
/// Retries of the same `(uploadId, chunkIndex)` overwrite the earlier row.
/// Forwarding failures are logged and never reach the caller. A finalized
/// upload takes no more chunks.
pub async fn record_chunk<S>(
    store: &S,
    sink: Arc<dyn ChunkSink>,
    req: ChunkUploadRequest,
    now: Timestamp,
) -> ApiResult<ChunkUploadResponse>
where
    S: ChunkStore + ?Sized,
{
    let upload_id = required_text(req.upload_id, "uploadId")?;
    let chunk_index = required(req.chunk_index, "chunkIndex")?;
    let total_chunks = required(req.total_chunks, "totalChunks")?;
    let chunk_data = required(req.chunk_data, "chunkData")?;
    if chunk_data.trim().is_empty() {
        return Err(ApiError::missing_field("chunkData"));
    }
    let holder_id = required_text(req.candidate_id, "candidateId")?;
    let context_id = required_text(req.interview_id, "interviewId")?;
    validate_chunk_position(chunk_index, total_chunks)?;

    if store.upload_get(&upload_id).await?.is_some() {
        with_metrics(|m| m.record_chunk("rejected"));
        tracing::warn!(upload_id = %upload_id, chunk_index, "Chunk for finalized upload");
        return Err(ApiError::upload_finalized(&upload_id));
    }

    let bytes = decode_chunk(&chunk_data).map_err(|e| {
        with_metrics(|m| m.record_chunk("rejected"));
        tracing::warn!(upload_id = %upload_id, chunk_index, error = %e, "Chunk rejected");
        ApiError::from(e)
    })?;
    // The base64 text can be large; release it before the forward
    drop(chunk_data);
    if bytes.is_empty() {
        // e.g. a bare data URL prefix
        return Err(ApiError::missing_field("chunkData"));
    }

    let record = ChunkRecord {
        upload_id: upload_id.clone(),
        chunk_index,
        total_chunks,
        holder_id,
        context_id,
        chunk_size: bytes.len() as u64,
        content_type: req
            .video_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        received_at: now,
    };
    let chunks_received = store.chunk_upsert(&record).await?;
    with_metrics(|m| m.record_chunk("stored"));

    tracing::info!(
        upload_id = %upload_id,
        chunk_index,
        total_chunks,
        chunks_received,
        chunk_bytes = record.chunk_size,
        "Chunk recorded"
    );

    let upload = ChunkUpload {
        upload_id: record.upload_id.clone(),
        chunk_index,
        file_name: record.file_name(),
        content_type: record.content_type.clone(),
        bytes,
    };
    tokio::spawn(async move {
        let upload_id = upload.upload_id.clone();
        let file_name = upload.file_name.clone();
        match sink.push(upload).await {
            Ok(receipt) => {
                with_metrics(|m| m.record_chunk("forwarded"));
                tracing::debug!(
                    upload_id = %upload_id,
                    chunk_index,
                    file_name = %file_name,
                    message = ?receipt.message,
                    "Chunk forwarded"
                );
            }
            Err(e) => {
                with_metrics(|m| m.record_chunk("forward_failed"));
                tracing::error!(
                    upload_id = %upload_id,
                    chunk_index,
                    file_name = %file_name,
                    error = %e,
                    "Chunk forward failed"
                );
            }
        }
    });

    Ok(ChunkUploadResponse {
        success: true,
        upload_id,
        chunk_index,
        chunks_received,
        total_chunks,
        processing_in_background: true,
    })
}

/// Mark an upload complete once every declared chunk has been recorded.
///
/// Finalizing again with the same `totalChunks` returns the first record.
///
/// # Errors
/// `MISSING_CHUNKS` naming both counts when the recorded count differs from
/// `totalChunks`.
pub async fn finalize_upload<S>(
    store: &S,
    req: FinalizeUploadRequest,
    now: Timestamp,
) -> ApiResult<UploadRecord>
where
    S: ChunkStore + ?Sized,
{
    let upload_id = required_text(req.upload_id, "uploadId")?;
    let total_chunks = required(req.total_chunks, "totalChunks")?;
    let holder_id = required_text(req.candidate_id, "candidateId")?;
    let context_id = required_text(req.interview_id, "interviewId")?;
    if total_chunks == 0 {
        return Err(ApiError::invalid_input("totalChunks must be at least 1"));
    }

    if let Some(existing) = store.upload_get(&upload_id).await? {
        if existing.chunk_count == total_chunks {
            tracing::debug!(upload_id = %upload_id, "Upload already finalized");
            return Ok(existing);
        }
    }

    let found = store.chunk_count(&upload_id).await?;
    if let Err(e) = verify_complete(&upload_id, total_chunks, found) {
        tracing::warn!(
            upload_id = %upload_id,
            expected = total_chunks,
            found,
            "Finalize with missing chunks"
        );
        return Err(e.into());
    }

    let record = store
        .upload_finalize(&UploadRecord {
            upload_id,
            holder_id,
            context_id,
            chunk_count: found,
            finalized_at: now,
        })
        .await?;
    tracing::info!(
        upload_id = %record.upload_id,
        chunk_count = record.chunk_count,
        "Upload finalized"
    );
    Ok(record)
}

/// Progress of one upload.
///
/// # Errors
/// `UPLOAD_NOT_FOUND` when nothing was ever received for the ID.
pub async fn upload_progress<S>(store: &S, upload_id: &str) -> ApiResult<UploadProgress>
where
    S: ChunkStore + ?Sized,
{
    let chunks = store.chunk_list(upload_id).await?;
    let finalized = store.upload_get(upload_id).await?.is_some();
    if chunks.is_empty() && !finalized {
        return Err(ApiError::upload_not_found(upload_id));
    }
    Ok(UploadProgress::from_chunks(upload_id, &chunks, finalized))
}

// =============================================================================
// TESTS
// =============================================================================
