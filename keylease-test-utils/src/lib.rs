//! KEYLEASE Test Utilities
//!
//! Shared test infrastructure for the KEYLEASE workspace:
//! - Mock collaborators (chunk sink, usage provider)
//! - Proptest generators for requests and lease operation sequences
//! - Fixtures for stores and timestamps
//! - Assertions for the pool counter invariant

// Re-export the in-memory store from its source crate
pub use keylease_storage::{ChunkStore, InMemoryStore, LeaseStore};

// Re-export core types for convenience
pub use keylease_core::{
    AllocationRequest, ChunkRecord, ChunkSink, ChunkUpload, KeyIndex, KeyleaseError,
    KeyleaseResult, Lease, LeasePolicy, LeaseStatus, PoolResource, ProviderError, SinkReceipt,
    SubscriptionUsage, Timestamp, UsageProvider,
};

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// Chunk sink that keeps every pushed chunk for later inspection.
#[derive(Debug, Default)]
pub struct RecordingChunkSink {
    chunks: Mutex<Vec<ChunkUpload>>,
}

impl RecordingChunkSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks received so far, in arrival order.
    pub async fn received(&self) -> Vec<ChunkUpload> {
        self.chunks.lock().await.clone()
    }
}

#[async_trait]
impl ChunkSink for RecordingChunkSink {
    async fn push(&self, chunk: ChunkUpload) -> KeyleaseResult<SinkReceipt> {
        self.chunks.lock().await.push(chunk);
        Ok(SinkReceipt {
            message: Some("stored".to_string()),
        })
    }
}

/// Chunk sink whose endpoint always answers 500.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingChunkSink;

#[async_trait]
impl ChunkSink for FailingChunkSink {
    async fn push(&self, _chunk: ChunkUpload) -> KeyleaseResult<SinkReceipt> {
        Err(ProviderError::RequestFailed {
            provider: "upload".to_string(),
            status: 500,
            message: "upload endpoint unavailable".to_string(),
        }
        .into())
    }
}

/// Usage provider with canned answers per key. Keys without an entry
/// answer 401.
#[derive(Debug, Clone, Default)]
pub struct StaticUsageProvider {
    usage: BTreeMap<KeyIndex, SubscriptionUsage>,
}

impl StaticUsageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_usage(mut self, key_index: KeyIndex, count: i64, limit: i64) -> Self {
        self.usage.insert(
            key_index,
            SubscriptionUsage {
                character_count: count,
                character_limit: limit,
            },
        );
        self
    }
}

#[async_trait]
impl UsageProvider for StaticUsageProvider {
    fn configured_keys(&self) -> Vec<KeyIndex> {
        self.usage.keys().copied().collect()
    }

    async fn subscription(&self, key_index: KeyIndex) -> KeyleaseResult<SubscriptionUsage> {
        self.usage.get(&key_index).copied().ok_or_else(|| {
            ProviderError::RequestFailed {
                provider: "voice".to_string(),
                status: 401,
                message: "invalid api key".to_string(),
            }
            .into()
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for KEYLEASE inputs.

    use super::*;
    use proptest::prelude::*;

    /// Candidate or interview identifier, never blank.
    pub fn arb_participant_id() -> impl Strategy<Value = String> {
        "[a-z]{1,8}-[0-9]{1,4}"
    }

    pub fn arb_allocation_request() -> impl Strategy<Value = AllocationRequest> {
        (arb_participant_id(), arb_participant_id()).prop_map(|(holder_id, context_id)| {
            AllocationRequest {
                holder_id,
                context_id,
            }
        })
    }

    /// Small policies, so that exhaustion is reachable in short sequences.
    pub fn arb_policy() -> impl Strategy<Value = LeasePolicy> {
        (1i32..=5).prop_map(|capacity| LeasePolicy {
            capacity,
            ..LeasePolicy::default()
        })
    }

    /// One step of a lease workload.
    #[derive(Debug, Clone)]
    pub enum LeaseOp {
        Allocate,
        /// Heartbeat the n-th issued lease (modulo the number issued)
        Heartbeat(usize),
        /// Release the n-th issued lease (modulo the number issued)
        Release(usize),
        /// Let this many minutes pass
        Advance(i64),
        Reclaim,
    }

    pub fn arb_lease_op() -> impl Strategy<Value = LeaseOp> {
        prop_oneof![
            4 => Just(LeaseOp::Allocate),
            2 => any::<usize>().prop_map(LeaseOp::Heartbeat),
            2 => any::<usize>().prop_map(LeaseOp::Release),
            1 => (1i64..10).prop_map(LeaseOp::Advance),
            1 => Just(LeaseOp::Reclaim),
        ]
    }

    pub fn arb_lease_ops(max_len: usize) -> impl Strategy<Value = Vec<LeaseOp>> {
        prop::collection::vec(arb_lease_op(), 1..max_len)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made stores, requests and timestamps.

    use super::*;
    use chrono::{TimeZone, Utc};

    /// A fixed instant, so timing assertions do not depend on the wall clock.
    pub fn fixed_now() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// `fixed_now()` moved by `minutes`.
    pub fn minutes_after(minutes: i64) -> Timestamp {
        fixed_now() + chrono::Duration::minutes(minutes)
    }

    /// In-memory store with keys `0..count` provisioned at `fixed_now()`.
    pub fn store_with_keys(count: usize) -> KeyleaseResult<InMemoryStore> {
        InMemoryStore::with_keys(count, fixed_now())
    }

    pub fn allocation(holder: &str, context: &str) -> AllocationRequest {
        AllocationRequest {
            holder_id: holder.to_string(),
            context_id: context.to_string(),
        }
    }

    pub fn chunk_record(upload_id: &str, chunk_index: u32, total_chunks: u32) -> ChunkRecord {
        ChunkRecord {
            upload_id: upload_id.to_string(),
            chunk_index,
            total_chunks,
            holder_id: "candidate-1".to_string(),
            context_id: "interview-1".to_string(),
            chunk_size: 1024,
            content_type: keylease_core::DEFAULT_CONTENT_TYPE.to_string(),
            received_at: fixed_now(),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Checks for KEYLEASE-specific invariants.

    use super::*;
    use std::collections::HashMap;

    /// Assert that every key's counter equals its number of active leases
    /// and stays within `0..=capacity`.
    pub async fn assert_counters_consistent<S>(store: &S, policy: &LeasePolicy) -> KeyleaseResult<()>
    where
        S: LeaseStore + ?Sized,
    {
        let mut actual: HashMap<KeyIndex, i32> = HashMap::new();
        for lease in store.lease_list_active().await? {
            *actual.entry(lease.key_index).or_insert(0) += 1;
        }
        for resource in store.resource_list().await? {
            let expected = actual.get(&resource.key_index).copied().unwrap_or(0);
            assert_eq!(
                resource.active_lease_count, expected,
                "key {} counter drifted from its active leases",
                resource.key_index
            );
            assert!(
                (0..=policy.capacity).contains(&resource.active_lease_count),
                "key {} counter {} outside 0..={}",
                resource.key_index,
                resource.active_lease_count,
                policy.capacity
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_usage_provider() -> KeyleaseResult<()> {
        let usage = StaticUsageProvider::new().with_usage(2, 100, 1_000);
        assert_eq!(usage.configured_keys(), vec![2]);
        assert_eq!(usage.subscription(2).await?.available(), 900);
        assert!(usage.subscription(0).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_fixture_store_is_consistent() -> KeyleaseResult<()> {
        let store = fixtures::store_with_keys(3)?;
        assertions::assert_counters_consistent(&store, &LeasePolicy::default()).await
    }
}
