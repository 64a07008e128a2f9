//! Chunked upload metadata.
//!
//! Recordings arrive as indexed base64 chunks. Only metadata is persisted;
//! the bytes are forwarded to an external upload endpoint. Finalization
//! compares the number of recorded chunks with the declared total.

use crate::{Timestamp, UploadError, UploadId, ValidationError};
use serde::{Deserialize, Serialize};

/// Content type assumed when the client does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "video/webm";

/// Metadata for one received chunk. Unique on `(upload_id, chunk_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub upload_id: UploadId,
    /// Zero-based position in the recording
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub holder_id: String,
    pub context_id: String,
    /// Decoded size in bytes
    pub chunk_size: u64,
    pub content_type: String,
    pub received_at: Timestamp,
}

impl ChunkRecord {
    /// File name used when forwarding this chunk: one-based index.
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.webm", self.context_id, self.holder_id, self.chunk_index + 1)
    }
}

/// Marker written once an upload has been verified complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub upload_id: UploadId,
    pub holder_id: String,
    pub context_id: String,
    pub chunk_count: u32,
    pub finalized_at: Timestamp,
}

/// Aggregate view of an upload in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub upload_id: UploadId,
    pub chunks_received: u32,
    /// Declared total from the most recent chunk, if any arrived
    pub total_chunks: Option<u32>,
    pub received_bytes: u64,
    pub finalized: bool,
}

impl UploadProgress {
    /// Summarize the chunk rows of one upload.
    pub fn from_chunks(upload_id: &str, chunks: &[ChunkRecord], finalized: bool) -> Self {
        let total_chunks = chunks
            .iter()
            .max_by_key(|c| c.received_at)
            .map(|c| c.total_chunks);
        Self {
            upload_id: upload_id.to_string(),
            chunks_received: chunks.len() as u32,
            total_chunks,
            received_bytes: chunks.iter().map(|c| c.chunk_size).sum(),
            finalized,
        }
    }
}

/// Check a chunk's position against its declared total.
pub fn validate_chunk_position(chunk_index: u32, total_chunks: u32) -> Result<(), ValidationError> {
    if total_chunks == 0 {
        return Err(ValidationError::InvalidValue {
            field: "totalChunks".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    if chunk_index >= total_chunks {
        return Err(ValidationError::InvalidValue {
            field: "chunkIndex".to_string(),
            reason: format!("{} is not below totalChunks {}", chunk_index, total_chunks),
        });
    }
    Ok(())
}

/// Succeeds iff `found` equals `expected`.
pub fn verify_complete(upload_id: &str, expected: u32, found: u32) -> Result<(), UploadError> {
    if expected == found {
        Ok(())
    } else {
        Err(UploadError::MissingChunks {
            upload_id: upload_id.to_string(),
            expected,
            found,
        })
    }
}
