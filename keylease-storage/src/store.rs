//! Async store traits for leases, pool keys and chunk metadata.
//!
//! Every mutating operation takes `now` from the caller so that expiry
//! decisions are made against one clock reading per request.

use ::async_trait::async_trait;
use keylease_core::{
    AllocationRequest, ChunkRecord, CountCorrection, KeyIndex, KeyleaseResult, Lease, LeaseId,
    LeasePolicy, PoolResource, ReclaimedLease, ReleaseOutcome, Timestamp, UploadRecord,
};

/// Persistence for the key pool and its leases.
///
/// Implementations must keep `active_lease_count` equal to the number of
/// active leases on each key. `allocate`, `release` and `reclaim_stale` each
/// update the lease row and the counter as one atomic step.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Cheap round trip used by readiness checks.
    async fn health_check(&self) -> KeyleaseResult<()>;

    // ========================================================================
    // POOL REGISTRY
    // ========================================================================

    /// Insert keys that are not yet present. Existing rows are untouched.
    /// Returns the number of keys inserted.
    async fn ensure_resources(&self, key_indices: &[KeyIndex], now: Timestamp)
        -> KeyleaseResult<usize>;

    /// All keys ordered by index.
    async fn resource_list(&self) -> KeyleaseResult<Vec<PoolResource>>;

    async fn resource_get(&self, key_index: KeyIndex) -> KeyleaseResult<Option<PoolResource>>;

    /// Enable or disable a key for new allocations. Existing leases stay.
    async fn resource_set_active(
        &self,
        key_index: KeyIndex,
        is_active: bool,
        now: Timestamp,
    ) -> KeyleaseResult<PoolResource>;

    /// Store the latest credit balance for a key.
    async fn record_credits(
        &self,
        key_index: KeyIndex,
        available_credits: i64,
        now: Timestamp,
    ) -> KeyleaseResult<()>;

    /// Recompute every counter from the active leases. Returns the keys whose
    /// counter was wrong.
    async fn reconcile_counts(&self, now: Timestamp) -> KeyleaseResult<Vec<CountCorrection>>;

    // ========================================================================
    // LEASES
    // ========================================================================

    /// Pick the least-recently-used eligible key, take a slot on it and
    /// insert an active lease. Fails with `PoolError::Exhausted` when every
    /// active key is at capacity.
    async fn allocate(
        &self,
        request: &AllocationRequest,
        policy: &LeasePolicy,
        now: Timestamp,
    ) -> KeyleaseResult<Lease>;

    async fn lease_get(&self, lease_id: LeaseId) -> KeyleaseResult<Option<Lease>>;

    async fn lease_list_active(&self) -> KeyleaseResult<Vec<Lease>>;

    /// Apply a heartbeat. `None` when the lease is missing, terminal or past
    /// its hard ceiling.
    async fn renew(
        &self,
        lease_id: LeaseId,
        policy: &LeasePolicy,
        now: Timestamp,
    ) -> KeyleaseResult<Option<Lease>>;

    /// Complete an active lease and free its slot. Missing or terminal
    /// leases are a no-op.
    async fn release(&self, lease_id: LeaseId, now: Timestamp) -> KeyleaseResult<ReleaseOutcome>;

    /// Expire every reclaimable lease and free its slot.
    async fn reclaim_stale(
        &self,
        policy: &LeasePolicy,
        now: Timestamp,
    ) -> KeyleaseResult<Vec<ReclaimedLease>>;
}

/// Persistence for chunk metadata and finalized uploads.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert or overwrite the row for `(upload_id, chunk_index)`. Returns the
    /// number of distinct chunks now recorded for the upload.
    async fn chunk_upsert(&self, chunk: &ChunkRecord) -> KeyleaseResult<u32>;

    async fn chunk_count(&self, upload_id: &str) -> KeyleaseResult<u32>;

    /// Chunks of one upload ordered by index.
    async fn chunk_list(&self, upload_id: &str) -> KeyleaseResult<Vec<ChunkRecord>>;

    /// Record completion. If the upload was already finalized, the existing
    /// record is returned unchanged.
    async fn upload_finalize(&self, record: &UploadRecord) -> KeyleaseResult<UploadRecord>;

    async fn upload_get(&self, upload_id: &str) -> KeyleaseResult<Option<UploadRecord>>;
}

/// Both stores behind one handle.
pub trait Store: LeaseStore + ChunkStore {}

impl<T: LeaseStore + ChunkStore> Store for T {}
