//! Traits for the external services the pool talks to.

use crate::{KeyIndex, KeyleaseResult, UploadId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Character quota reported by the voice provider for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUsage {
    pub character_count: i64,
    pub character_limit: i64,
}

impl SubscriptionUsage {
    pub fn available(&self) -> i64 {
        (self.character_limit - self.character_count).max(0)
    }
}

/// Reports per-key usage from the voice provider.
#[async_trait]
pub trait UsageProvider: Send + Sync {
    /// Keys that have credentials configured.
    fn configured_keys(&self) -> Vec<KeyIndex>;

    /// Fetch the current subscription usage for one key.
    async fn subscription(&self, key_index: KeyIndex) -> KeyleaseResult<SubscriptionUsage>;
}

/// Bytes of one chunk on their way to the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUpload {
    pub upload_id: UploadId,
    pub chunk_index: u32,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Acknowledgement from the upload endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReceipt {
    pub message: Option<String>,
}

/// Destination for chunk bytes.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn push(&self, chunk: ChunkUpload) -> KeyleaseResult<SinkReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_credits() {
        let usage = SubscriptionUsage {
            character_count: 1_200,
            character_limit: 10_000,
        };
        assert_eq!(usage.available(), 8_800);

        let over = SubscriptionUsage {
            character_count: 11_000,
            character_limit: 10_000,
        };
        assert_eq!(over.available(), 0);
    }
}
