//! Chunked upload API types

use chrono::{DateTime, Utc};
use keylease_core::{UploadProgress, UploadRecord};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One base64 chunk of a recording.
///
/// Every field is optional on the wire so that a missing one is reported
/// by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkUploadRequest {
    pub upload_id: Option<String>,
    /// Zero-based position of this chunk
    pub chunk_index: Option<u32>,
    pub total_chunks: Option<u32>,
    /// Base64 payload, optionally a data URL
    pub chunk_data: Option<String>,
    pub candidate_id: Option<String>,
    pub interview_id: Option<String>,
    /// MIME type of the recording, `video/webm` when absent
    pub video_type: Option<String>,
}

/// Acknowledgement for a stored chunk. The bytes are still being forwarded
/// when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub upload_id: String,
    pub chunk_index: u32,
    /// Distinct chunks recorded for the upload so far
    pub chunks_received: u32,
    pub total_chunks: u32,
    pub processing_in_background: bool,
}

/// Declare an upload complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct FinalizeUploadRequest {
    pub upload_id: Option<String>,
    pub total_chunks: Option<u32>,
    pub candidate_id: Option<String>,
    pub interview_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadResponse {
    pub success: bool,
    pub upload_id: String,
    pub chunks_processed: u32,
    pub finalized_at: DateTime<Utc>,
}

impl From<UploadRecord> for FinalizeUploadResponse {
    fn from(record: UploadRecord) -> Self {
        Self {
            success: true,
            upload_id: record.upload_id,
            chunks_processed: record.chunk_count,
            finalized_at: record.finalized_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgressResponse {
    pub upload_id: String,
    pub chunks_received: u32,
    /// Declared total, unknown until a chunk arrives
    pub total_chunks: Option<u32>,
    pub received_bytes: u64,
    pub finalized: bool,
}

impl From<UploadProgress> for UploadProgressResponse {
    fn from(p: UploadProgress) -> Self {
        Self {
            upload_id: p.upload_id,
            chunks_received: p.chunks_received,
            total_chunks: p.total_chunks,
            received_bytes: p.received_bytes,
            finalized: p.finalized,
        }
    }
}
