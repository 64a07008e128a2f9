//! Chunk sinks: where decoded chunk bytes go after their metadata is stored.

use async_trait::async_trait;
use keylease_core::{ChunkSink, ChunkUpload, KeyleaseResult, ProviderError, SinkReceipt};
use reqwest::{multipart, Client};
use serde::Deserialize;

use super::ProviderConfig;

const PROVIDER_NAME: &str = "upload";

/// Reply from the upload endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UploadReply {
    success: Option<bool>,
    message: Option<String>,
    error: Option<String>,
}

/// Posts each chunk as a multipart `file` field.
#[derive(Debug, Clone)]
pub struct HttpChunkSink {
    client: Client,
    endpoint: String,
}

impl HttpChunkSink {
    pub fn new(endpoint: impl Into<String>, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn request_failed(status: u16, message: impl Into<String>) -> ProviderError {
        ProviderError::RequestFailed {
            provider: PROVIDER_NAME.to_string(),
            status,
            message: message.into(),
        }
    }
}

#[async_trait]
impl ChunkSink for HttpChunkSink {
    async fn push(&self, chunk: ChunkUpload) -> KeyleaseResult<SinkReceipt> {
        let part = multipart::Part::bytes(chunk.bytes)
            .file_name(chunk.file_name.clone())
            .mime_str(&chunk.content_type)
            .map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("invalid content type '{}': {}", chunk.content_type, e),
            })?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("uploadId", chunk.upload_id.clone())
            .text("chunkIndex", chunk.chunk_index.to_string());

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::request_failed(e.status().map(|s| s.as_u16()).unwrap_or(0), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::request_failed(status.as_u16(), body).into());
        }

        // Some endpoints reply with an empty body
        let body = response.text().await.unwrap_or_default();
        let reply: UploadReply = if body.trim().is_empty() {
            UploadReply::default()
        } else {
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: e.to_string(),
            })?
        };

        if reply.success == Some(false) {
            let message = reply
                .error
                .or(reply.message)
                .unwrap_or_else(|| "upload rejected".to_string());
            return Err(Self::request_failed(status.as_u16(), message).into());
        }

        Ok(SinkReceipt {
            message: reply.message,
        })
    }
}

/// Accepts and drops every chunk. Used when no upload endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardChunkSink;

#[async_trait]
impl ChunkSink for DiscardChunkSink {
    async fn push(&self, chunk: ChunkUpload) -> KeyleaseResult<SinkReceipt> {
        tracing::debug!(
            upload_id = %chunk.upload_id,
            chunk_index = chunk.chunk_index,
            bytes = chunk.bytes.len(),
            "No upload endpoint configured, discarding chunk"
        );
        Ok(SinkReceipt::default())
    }
}
