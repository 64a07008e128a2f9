//! KEYLEASE Storage - Store Traits and In-Memory Implementation
//!
//! Defines the storage abstraction for the key pool, leases and chunk
//! metadata. The PostgreSQL implementation lives in keylease-api.

pub mod store;

pub use store::{ChunkStore, LeaseStore, Store};

use ::async_trait::async_trait;
use keylease_core::{
    lru_order, new_lease_id, AllocationRequest, ChunkRecord, CountCorrection, EntityKind,
    KeyIndex, KeyleaseError, KeyleaseResult, Lease, LeaseId, LeasePolicy, LeaseStatus, PoolError,
    PoolResource, ReclaimedLease, ReleaseOutcome, StorageError, Timestamp, UploadRecord,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    resources: BTreeMap<KeyIndex, PoolResource>,
    leases: HashMap<LeaseId, Lease>,
    chunks: BTreeMap<(String, u32), ChunkRecord>,
    uploads: HashMap<String, UploadRecord>,
}

impl MemoryState {
    fn resource_mut(&mut self, key_index: KeyIndex) -> KeyleaseResult<&mut PoolResource> {
        self.resources
            .get_mut(&key_index)
            .ok_or(KeyleaseError::Pool(PoolError::UnknownKey { key_index }))
    }

    fn active_counts(&self) -> HashMap<KeyIndex, i32> {
        let mut counts = HashMap::new();
        for lease in self.leases.values().filter(|l| l.is_active()) {
            *counts.entry(lease.key_index).or_insert(0) += 1;
        }
        counts
    }

    fn chunk_count(&self, upload_id: &str) -> u32 {
        self.chunks
            .range((upload_id.to_string(), 0)..=(upload_id.to_string(), u32::MAX))
            .count() as u32
    }
}

/// In-memory store for tests and single-process development.
///
/// All state sits behind one `RwLock`, so every operation, including the
/// check-and-increment in `allocate`, is atomic with respect to the others.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with keys `0..count` provisioned.
    pub fn with_keys(count: usize, now: Timestamp) -> KeyleaseResult<Self> {
        let store = Self::new();
        {
            let mut state = store.write()?;
            for index in 0..count as KeyIndex {
                state
                    .resources
                    .insert(index, PoolResource::provision(index, now));
            }
        }
        Ok(store)
    }

    /// Number of lease rows in any status.
    pub fn lease_count(&self) -> KeyleaseResult<usize> {
        Ok(self.read()?.leases.len())
    }

    fn read(&self) -> KeyleaseResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| KeyleaseError::Storage(StorageError::LockPoisoned))
    }

    fn write(&self) -> KeyleaseResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| KeyleaseError::Storage(StorageError::LockPoisoned))
    }
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    async fn health_check(&self) -> KeyleaseResult<()> {
        self.read().map(|_| ())
    }

    async fn ensure_resources(
        &self,
        key_indices: &[KeyIndex],
        now: Timestamp,
    ) -> KeyleaseResult<usize> {
        let mut state = self.write()?;
        let mut inserted = 0;
        for &index in key_indices {
            if !state.resources.contains_key(&index) {
                state.resources.insert(index, PoolResource::provision(index, now));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn resource_list(&self) -> KeyleaseResult<Vec<PoolResource>> {
        Ok(self.read()?.resources.values().cloned().collect())
    }

    async fn resource_get(&self, key_index: KeyIndex) -> KeyleaseResult<Option<PoolResource>> {
        Ok(self.read()?.resources.get(&key_index).cloned())
    }

    async fn resource_set_active(
        &self,
        key_index: KeyIndex,
        is_active: bool,
        now: Timestamp,
    ) -> KeyleaseResult<PoolResource> {
        let mut state = self.write()?;
        let resource = state.resource_mut(key_index)?;
        resource.is_active = is_active;
        resource.updated_at = now;
        Ok(resource.clone())
    }

    async fn record_credits(
        &self,
        key_index: KeyIndex,
        available_credits: i64,
        now: Timestamp,
    ) -> KeyleaseResult<()> {
        let mut state = self.write()?;
        let resource = state.resource_mut(key_index)?;
        resource.available_credits = Some(available_credits);
        resource.last_credit_check = Some(now);
        resource.updated_at = now;
        Ok(())
    }

    async fn reconcile_counts(&self, now: Timestamp) -> KeyleaseResult<Vec<CountCorrection>> {
        let mut state = self.write()?;
        let actual = state.active_counts();
        let mut corrections = Vec::new();
        for resource in state.resources.values_mut() {
            let count = actual.get(&resource.key_index).copied().unwrap_or(0);
            if resource.active_lease_count != count {
                corrections.push(CountCorrection {
                    key_index: resource.key_index,
                    recorded: resource.active_lease_count,
                    actual: count,
                });
                resource.active_lease_count = count;
                resource.updated_at = now;
            }
        }
        Ok(corrections)
    }

    async fn allocate(
        &self,
        request: &AllocationRequest,
        policy: &LeasePolicy,
        now: Timestamp,
    ) -> KeyleaseResult<Lease> {
        let mut state = self.write()?;
        let key_index = state
            .resources
            .values()
            .filter(|r| r.is_eligible(policy.capacity))
            .min_by(|a, b| lru_order(a, b))
            .map(|r| r.key_index)
            .ok_or(KeyleaseError::Pool(PoolError::Exhausted {
                capacity: policy.capacity,
            }))?;

        state.resource_mut(key_index)?.take_slot(now);
        let lease = Lease::issue(new_lease_id(), key_index, request, policy, now);
        state.leases.insert(lease.lease_id, lease.clone());
        Ok(lease)
    }

    async fn lease_get(&self, lease_id: LeaseId) -> KeyleaseResult<Option<Lease>> {
        Ok(self.read()?.leases.get(&lease_id).cloned())
    }

    async fn lease_list_active(&self) -> KeyleaseResult<Vec<Lease>> {
        let state = self.read()?;
        let mut leases: Vec<Lease> = state
            .leases
            .values()
            .filter(|l| l.is_active())
            .cloned()
            .collect();
        leases.sort_by_key(|l| l.issued_at);
        Ok(leases)
    }

    async fn renew(
        &self,
        lease_id: LeaseId,
        policy: &LeasePolicy,
        now: Timestamp,
    ) -> KeyleaseResult<Option<Lease>> {
        let mut state = self.write()?;
        match state.leases.get_mut(&lease_id) {
            Some(lease) if lease.is_renewable(policy, now) => {
                lease.renew(policy, now);
                Ok(Some(lease.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release(&self, lease_id: LeaseId, now: Timestamp) -> KeyleaseResult<ReleaseOutcome> {
        let mut state = self.write()?;
        let key_index = match state.leases.get_mut(&lease_id) {
            Some(lease) if lease.is_active() => {
                lease.close(LeaseStatus::Completed, now);
                lease.key_index
            }
            _ => return Ok(ReleaseOutcome::AlreadyInactive),
        };
        if let Some(resource) = state.resources.get_mut(&key_index) {
            resource.free_slot(now);
        }
        Ok(ReleaseOutcome::Released { key_index })
    }

    async fn reclaim_stale(
        &self,
        policy: &LeasePolicy,
        now: Timestamp,
    ) -> KeyleaseResult<Vec<ReclaimedLease>> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let mut stale: Vec<&mut Lease> = state
            .leases
            .values_mut()
            .filter(|l| l.is_reclaimable(policy, now))
            .collect();
        stale.sort_by_key(|l| l.last_heartbeat_at);

        let mut reclaimed = Vec::with_capacity(stale.len());
        for lease in stale {
            lease.close(LeaseStatus::Expired, now);
            let remaining = match state.resources.get_mut(&lease.key_index) {
                Some(resource) => {
                    resource.free_slot(now);
                    resource.active_lease_count
                }
                None => 0,
            };
            reclaimed.push(ReclaimedLease::from_lease(lease, remaining, now));
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn chunk_upsert(&self, chunk: &ChunkRecord) -> KeyleaseResult<u32> {
        let mut state = self.write()?;
        state
            .chunks
            .insert((chunk.upload_id.clone(), chunk.chunk_index), chunk.clone());
        Ok(state.chunk_count(&chunk.upload_id))
    }

    async fn chunk_count(&self, upload_id: &str) -> KeyleaseResult<u32> {
        Ok(self.read()?.chunk_count(upload_id))
    }

    async fn chunk_list(&self, upload_id: &str) -> KeyleaseResult<Vec<ChunkRecord>> {
        let state = self.read()?;
        Ok(state
            .chunks
            .range((upload_id.to_string(), 0)..=(upload_id.to_string(), u32::MAX))
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }

    async fn upload_finalize(&self, record: &UploadRecord) -> KeyleaseResult<UploadRecord> {
        let mut state = self.write()?;
        let stored = state
            .uploads
            .entry(record.upload_id.clone())
            .or_insert_with(|| record.clone());
        Ok(stored.clone())
    }

    async fn upload_get(&self, upload_id: &str) -> KeyleaseResult<Option<UploadRecord>> {
        Ok(self.read()?.uploads.get(upload_id).cloned())
    }
}

/// Look up a lease or fail with a storage not-found error.
pub async fn require_lease<S>(store: &S, lease_id: LeaseId) -> KeyleaseResult<Lease>
where
    S: LeaseStore + ?Sized,
{
    store
        .lease_get(lease_id)
        .await?
        .ok_or(KeyleaseError::Storage(StorageError::NotFound {
            entity: EntityKind::Lease,
            id: lease_id.to_string(),
        }))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use keylease_core::DEFAULT_CONTENT_TYPE;
    use proptest::prelude::*;

    fn request(n: usize) -> AllocationRequest {
        AllocationRequest {
            holder_id: format!("candidate-{}", n),
            context_id: format!("interview-{}", n),
        }
    }

    fn chunk(upload_id: &str, index: u32, total: u32) -> ChunkRecord {
        ChunkRecord {
            upload_id: upload_id.to_string(),
            chunk_index: index,
            total_chunks: total,
            holder_id: "cand".to_string(),
            context_id: "int".to_string(),
            chunk_size: 1024,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            received_at: Utc::now(),
        }
    }

    async fn assert_counts_match(store: &InMemoryStore) -> KeyleaseResult<()> {
        let active = store.lease_list_active().await?;
        for resource in store.resource_list().await? {
            let expected = active
                .iter()
                .filter(|l| l.key_index == resource.key_index)
                .count() as i32;
            assert_eq!(resource.active_lease_count, expected);
        }
        Ok(())
    }

    // ========================================================================
    // Pool Registry Tests
    // ========================================================================

    #[tokio::test]
    async fn test_ensure_resources_is_insert_only() -> KeyleaseResult<()> {
        let now = Utc::now();
        let store = InMemoryStore::with_keys(2, now)?;
        let policy = LeasePolicy::default();
        store.allocate(&request(1), &policy, now).await?;

        let inserted = store.ensure_resources(&[0, 1, 2], now).await?;
        assert_eq!(inserted, 1);

        let resources = store.resource_list().await?;
        assert_eq!(resources.len(), 3);
        assert_eq!(resources[0].active_lease_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_record_credits_unknown_key() -> KeyleaseResult<()> {
        let store = InMemoryStore::with_keys(1, Utc::now())?;
        let result = store.record_credits(9, 100, Utc::now()).await;
        assert!(matches!(
            result,
            Err(KeyleaseError::Pool(PoolError::UnknownKey { key_index: 9 }))
        ));
        store.record_credits(0, 100, Utc::now()).await?;
        let resource = store.resource_get(0).await?;
        assert_eq!(resource.and_then(|r| r.available_credits), Some(100));
        Ok(())
    }

    #[tokio::test]
    async fn test_reconcile_repairs_drift() -> KeyleaseResult<()> {
        let now = Utc::now();
        let store = InMemoryStore::with_keys(2, now)?;
        store.allocate(&request(1), &LeasePolicy::default(), now).await?;
        {
            let mut state = store.write()?;
            if let Some(r) = state.resources.get_mut(&1) {
                r.active_lease_count = 4;
            }
        }
        let corrections = store.reconcile_counts(now).await?;
        assert_eq!(
            corrections,
            vec![CountCorrection {
                key_index: 1,
                recorded: 4,
                actual: 0
            }]
        );
        assert!(store.reconcile_counts(now).await?.is_empty());
        assert_counts_match(&store).await
    }

    // ========================================================================
    // Lease Tests
    // ========================================================================

    #[tokio::test]
    async fn test_allocate_spreads_by_lru() -> KeyleaseResult<()> {
        let now = Utc::now();
        let store = InMemoryStore::with_keys(3, now)?;
        let policy = LeasePolicy::default();

        let mut keys = Vec::new();
        for n in 0..3 {
            let at = now + Duration::seconds(n as i64);
            keys.push(store.allocate(&request(n), &policy, at).await?.key_index);
        }
        keys.sort();
        assert_eq!(keys, vec![0, 1, 2]);
        assert_counts_match(&store).await
    }

    #[tokio::test]
    async fn test_sixth_allocation_on_single_key_is_exhausted() -> KeyleaseResult<()> {
        let now = Utc::now();
        let store = InMemoryStore::with_keys(1, now)?;
        let policy = LeasePolicy::default();
        for n in 0..5 {
            store.allocate(&request(n), &policy, now).await?;
        }
        let sixth = store.allocate(&request(6), &policy, now).await;
        assert!(matches!(
            sixth,
            Err(KeyleaseError::Pool(PoolError::Exhausted { capacity: 5 }))
        ));
        assert_eq!(store.lease_count()?, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_inactive_key_not_allocated() -> KeyleaseResult<()> {
        let now = Utc::now();
        let store = InMemoryStore::with_keys(2, now)?;
        store.resource_set_active(0, false, now).await?;
        let lease = store
            .allocate(&request(1), &LeasePolicy::default(), now)
            .await?;
        assert_eq!(lease.key_index, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_is_idempotent() -> KeyleaseResult<()> {
        let now = Utc::now();
        let store = InMemoryStore::with_keys(1, now)?;
        let lease = store
            .allocate(&request(1), &LeasePolicy::default(), now)
            .await?;

        let first = store.release(lease.lease_id, now).await?;
        let second = store.release(lease.lease_id, now).await?;
        assert_eq!(first, ReleaseOutcome::Released { key_index: 0 });
        assert_eq!(second, ReleaseOutcome::AlreadyInactive);

        let resource = store.resource_get(0).await?;
        assert_eq!(resource.map(|r| r.active_lease_count), Some(0));
        let stored = require_lease(&store, lease.lease_id).await?;
        assert_eq!(stored.status, LeaseStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_unknown_lease_is_noop() -> KeyleaseResult<()> {
        let store = InMemoryStore::with_keys(1, Utc::now())?;
        let outcome = store.release(new_lease_id(), Utc::now()).await?;
        assert!(!outcome.released());
        Ok(())
    }

    #[tokio::test]
    async fn test_renew_rejects_terminal_and_unknown() -> KeyleaseResult<()> {
        let now = Utc::now();
        let policy = LeasePolicy::default();
        let store = InMemoryStore::with_keys(1, now)?;
        let lease = store.allocate(&request(1), &policy, now).await?;

        let renewed = store
            .renew(lease.lease_id, &policy, now + Duration::minutes(1))
            .await?;
        assert_eq!(
            renewed.map(|l| l.expires_at),
            Some(now + Duration::minutes(4))
        );

        store.release(lease.lease_id, now).await?;
        assert!(store.renew(lease.lease_id, &policy, now).await?.is_none());
        assert!(store.renew(new_lease_id(), &policy, now).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_reclaim_stale_heartbeat() -> KeyleaseResult<()> {
        let now = Utc::now();
        let policy = LeasePolicy::default();
        let store = InMemoryStore::with_keys(1, now)?;
        let stale = store.allocate(&request(1), &policy, now).await?;
        let fresh = store
            .allocate(&request(2), &policy, now + Duration::minutes(2))
            .await?;

        let later = now + Duration::minutes(4);
        let reclaimed = store.reclaim_stale(&policy, later).await?;
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].lease_id, stale.lease_id);
        assert_eq!(reclaimed[0].minutes_since_heartbeat, 4);
        assert_eq!(reclaimed[0].key_active_leases_after, 1);

        assert!(store.reclaim_stale(&policy, later).await?.is_empty());
        let still_active = require_lease(&store, fresh.lease_id).await?;
        assert!(still_active.is_active());
        assert_counts_match(&store).await
    }

    // ========================================================================
    // Chunk Tests
    // ========================================================================

    #[tokio::test]
    async fn test_chunk_upsert_overwrites_retries() -> KeyleaseResult<()> {
        let store = InMemoryStore::new();
        assert_eq!(store.chunk_upsert(&chunk("a", 0, 3)).await?, 1);
        assert_eq!(store.chunk_upsert(&chunk("a", 0, 3)).await?, 1);
        assert_eq!(store.chunk_upsert(&chunk("a", 2, 3)).await?, 2);
        assert_eq!(store.chunk_upsert(&chunk("ab", 0, 1)).await?, 1);
        assert_eq!(store.chunk_count("a").await?, 2);

        let indices: Vec<u32> = store
            .chunk_list("a")
            .await?
            .iter()
            .map(|c| c.chunk_index)
            .collect();
        assert_eq!(indices, vec![0, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_finalize_keeps_first_record() -> KeyleaseResult<()> {
        let store = InMemoryStore::new();
        let first = UploadRecord {
            upload_id: "a".to_string(),
            holder_id: "cand".to_string(),
            context_id: "int".to_string(),
            chunk_count: 2,
            finalized_at: Utc::now(),
        };
        let mut second = first.clone();
        second.finalized_at = first.finalized_at + Duration::seconds(5);

        store.upload_finalize(&first).await?;
        let stored = store.upload_finalize(&second).await?;
        assert_eq!(stored, first);
        Ok(())
    }

    // ========================================================================
    // Property Tests
    // ========================================================================

    #[derive(Debug, Clone)]
    enum Op {
        Allocate,
        Release(usize),
        Renew(usize),
        Advance(i64),
        Sweep,
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Allocate),
            2 => any::<usize>().prop_map(Op::Release),
            2 => any::<usize>().prop_map(Op::Renew),
            1 => (1i64..300).prop_map(Op::Advance),
            1 => Just(Op::Sweep),
        ]
    }

    proptest! {
        #[test]
        fn prop_counter_matches_active_leases(
            keys in 1usize..4,
            ops in prop::collection::vec(arb_op(), 1..60),
        ) {
            let rt = tokio::runtime::Runtime::new()
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            rt.block_on(async {
                let policy = LeasePolicy::default();
                let mut now = Utc::now();
                let store = InMemoryStore::with_keys(keys, now)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let mut issued: Vec<LeaseId> = Vec::new();

                for (n, op) in ops.into_iter().enumerate() {
                    let result = match op {
                        Op::Allocate => match store.allocate(&request(n), &policy, now).await {
                            Ok(lease) => {
                                issued.push(lease.lease_id);
                                Ok(())
                            }
                            Err(KeyleaseError::Pool(PoolError::Exhausted { .. })) => Ok(()),
                            Err(e) => Err(e),
                        },
                        Op::Release(i) if !issued.is_empty() => {
                            store.release(issued[i % issued.len()], now).await.map(|_| ())
                        }
                        Op::Renew(i) if !issued.is_empty() => store
                            .renew(issued[i % issued.len()], &policy, now)
                            .await
                            .map(|_| ()),
                        Op::Advance(secs) => {
                            now += Duration::seconds(secs);
                            Ok(())
                        }
                        Op::Sweep => store.reclaim_stale(&policy, now).await.map(|_| ()),
                        _ => Ok(()),
                    };
                    result.map_err(|e| TestCaseError::fail(e.to_string()))?;

                    let active = store.lease_list_active().await
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                    let resources = store.resource_list().await
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                    for resource in resources {
                        let expected = active
                            .iter()
                            .filter(|l| l.key_index == resource.key_index)
                            .count() as i32;
                        prop_assert_eq!(resource.active_lease_count, expected);
                        prop_assert!(resource.active_lease_count >= 0);
                        prop_assert!(resource.active_lease_count <= policy.capacity);
                    }
                }
                Ok(())
            })?;
        }
    }
}
