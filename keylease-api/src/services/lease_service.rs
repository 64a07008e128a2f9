//! Lease Service
//!
//! Allocate, renew, release and reclaim leases on pooled API keys. Handlers
//! and the sweep job call these; the store does the atomic work.

use keylease_core::{
    AllocationRequest, KeyleaseError, Lease, LeaseId, LeasePolicy, PoolError, ReclaimedLease,
    ReleaseOutcome, Timestamp,
};
use keylease_storage::LeaseStore;

use crate::error::{ApiError, ApiResult};
use crate::telemetry::metrics::with_metrics;
use crate::types::AllocateRequest;

/// Parse a `sessionId` field into a lease ID.
pub fn parse_session_id(raw: Option<&str>) -> ApiResult<LeaseId> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field("sessionId"))?;
    LeaseId::parse_str(raw).map_err(|_| ApiError::invalid_format("sessionId", "UUID"))
}

/// Check and trim the holder and context IDs of an allocation.
pub fn validate_allocation(req: AllocateRequest) -> ApiResult<AllocationRequest> {
    let holder_id = req.candidate_id.trim();
    if holder_id.is_empty() {
        return Err(ApiError::missing_field("candidateId"));
    }
    let context_id = req.interview_id.trim();
    if context_id.is_empty() {
        return Err(ApiError::missing_field("interviewId"));
    }
    Ok(AllocationRequest {
        holder_id: holder_id.to_string(),
        context_id: context_id.to_string(),
    })
}

/// Issue a lease on the least-recently-used key with a free slot.
///
/// Stale leases are reclaimed first so that abandoned sessions do not hold
/// capacity. A failed reclaim is logged and allocation goes ahead.
///
/// # Errors
/// `POOL_EXHAUSTED` when every active key is at capacity.
pub async fn allocate_lease<S>(
    store: &S,
    policy: &LeasePolicy,
    req: AllocateRequest,
    now: Timestamp,
) -> ApiResult<Lease>
where
    S: LeaseStore + ?Sized,
{
    let request = validate_allocation(req)?;

    if let Err(e) = reclaim_expired(store, policy, now).await {
        tracing::warn!(error = %e, "Reclaim before allocation failed, continuing");
    }

    match store.allocate(&request, policy, now).await {
        Ok(lease) => {
            with_metrics(|m| m.record_allocation("granted"));
            tracing::info!(
                lease_id = %lease.lease_id,
                key_index = lease.key_index,
                holder_id = %lease.holder_id,
                context_id = %lease.context_id,
                expires_at = %lease.expires_at,
                "Lease allocated"
            );
            Ok(lease)
        }
        Err(KeyleaseError::Pool(PoolError::Exhausted { capacity })) => {
            with_metrics(|m| m.record_allocation("exhausted"));
            tracing::warn!(
                holder_id = %request.holder_id,
                capacity,
                "Key pool exhausted"
            );
            Err(PoolError::Exhausted { capacity }.into())
        }
        Err(e) => {
            with_metrics(|m| m.record_allocation("error"));
            Err(e.into())
        }
    }
}

/// Apply a heartbeat.
///
/// # Errors
/// `LEASE_NOT_FOUND` when the lease is unknown, terminal or past its hard
/// ceiling.
pub async fn renew_lease<S>(
    store: &S,
    policy: &LeasePolicy,
    session_id: Option<&str>,
    now: Timestamp,
) -> ApiResult<Lease>
where
    S: LeaseStore + ?Sized,
{
    let lease_id = parse_session_id(session_id)?;
    match store.renew(lease_id, policy, now).await? {
        Some(lease) => {
            with_metrics(|m| m.record_renewal(true));
            tracing::debug!(
                lease_id = %lease.lease_id,
                key_index = lease.key_index,
                expires_at = %lease.expires_at,
                "Lease renewed"
            );
            Ok(lease)
        }
        None => {
            with_metrics(|m| m.record_renewal(false));
            tracing::info!(lease_id = %lease_id, "Heartbeat for inactive lease");
            Err(ApiError::lease_not_found(lease_id))
        }
    }
}

/// Release a lease. Unknown or already closed leases succeed without effect.
pub async fn release_lease<S>(
    store: &S,
    session_id: Option<&str>,
    now: Timestamp,
) -> ApiResult<ReleaseOutcome>
where
    S: LeaseStore + ?Sized,
{
    let lease_id = parse_session_id(session_id)?;
    let outcome = store.release(lease_id, now).await?;
    match outcome {
        ReleaseOutcome::Released { key_index } => {
            with_metrics(|m| m.record_release());
            tracing::info!(lease_id = %lease_id, key_index, "Lease released");
        }
        ReleaseOutcome::AlreadyInactive => {
            tracing::debug!(lease_id = %lease_id, "Release of inactive lease ignored");
        }
    }
    Ok(outcome)
}

/// Expire every lease that stopped heartbeating or passed its expiry.
pub async fn reclaim_expired<S>(
    store: &S,
    policy: &LeasePolicy,
    now: Timestamp,
) -> ApiResult<Vec<ReclaimedLease>>
where
    S: LeaseStore + ?Sized,
{
    let reclaimed = store.reclaim_stale(policy, now).await?;
    for r in &reclaimed {
        tracing::info!(
            lease_id = %r.lease_id,
            holder_id = %r.holder_id,
            context_id = %r.context_id,
            key_index = r.key_index,
            minutes_since_heartbeat = r.minutes_since_heartbeat,
            key_active_leases = r.key_active_leases_after,
            "Reclaimed stale lease"
        );
    }
    if !reclaimed.is_empty() {
        with_metrics(|m| m.record_reclaimed(reclaimed.len()));
    }
    Ok(reclaimed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::{Duration, Utc};
    use keylease_core::LeaseStatus;
    use keylease_storage::InMemoryStore;

    fn request(candidate: &str, interview: &str) -> AllocateRequest {
        AllocateRequest {
            candidate_id: candidate.to_string(),
            interview_id: interview.to_string(),
        }
    }

    #[test]
    fn test_parse_session_id() {
        let id = keylease_core::new_lease_id();
        assert_eq!(parse_session_id(Some(&id.to_string())).ok(), Some(id));
        assert_eq!(
            parse_session_id(None).map_err(|e| e.code),
            Err(ErrorCode::MissingField)
        );
        assert_eq!(
            parse_session_id(Some("  ")).map_err(|e| e.code),
            Err(ErrorCode::MissingField)
        );
        assert_eq!(
            parse_session_id(Some("not-a-uuid")).map_err(|e| e.code),
            Err(ErrorCode::InvalidFormat)
        );
    }

    #[test]
    fn test_validate_allocation_trims_and_requires_ids() {
        let req = validate_allocation(request("  c-1 ", "\ti-1")).ok();
        assert_eq!(
            req,
            Some(AllocationRequest {
                holder_id: "c-1".to_string(),
                context_id: "i-1".to_string(),
            })
        );
        assert_eq!(
            validate_allocation(request("c-1", "   ")).map_err(|e| e.code),
            Err(ErrorCode::MissingField)
        );
    }

    #[tokio::test]
    async fn test_blank_ids_are_rejected_without_side_effects() -> ApiResult<()> {
        let store = InMemoryStore::with_keys(1, Utc::now())?;
        let policy = LeasePolicy::default();

        let err = allocate_lease(&store, &policy, request(" ", "i-1"), Utc::now())
            .await
            .err()
            .map(|e| e.code);
        assert_eq!(err, Some(ErrorCode::MissingField));
        assert_eq!(store.lease_count()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_allocate_reclaims_stale_lease_first() -> ApiResult<()> {
        let start = Utc::now();
        let store = InMemoryStore::with_keys(1, start)?;
        let policy = LeasePolicy {
            capacity: 1,
            ..LeasePolicy::default()
        };

        let stale = allocate_lease(&store, &policy, request("c-1", "i-1"), start).await?;

        // Silent for longer than the heartbeat window; the single slot is freed
        let later = start + policy.window() + Duration::seconds(1);
        let fresh = allocate_lease(&store, &policy, request("c-2", "i-2"), later).await?;
        assert_eq!(fresh.key_index, stale.key_index);

        let old = store.lease_get(stale.lease_id).await?;
        assert_eq!(old.map(|l| l.status), Some(LeaseStatus::Expired));
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausted_pool_maps_to_429() -> ApiResult<()> {
        let now = Utc::now();
        let store = InMemoryStore::with_keys(1, now)?;
        let policy = LeasePolicy {
            capacity: 1,
            ..LeasePolicy::default()
        };
        allocate_lease(&store, &policy, request("c-1", "i-1"), now).await?;

        let err = allocate_lease(&store, &policy, request("c-2", "i-2"), now)
            .await
            .err()
            .map(|e| e.code);
        assert_eq!(err, Some(ErrorCode::PoolExhausted));
        Ok(())
    }

    #[tokio::test]
    async fn test_heartbeat_moves_expiry_forward() -> ApiResult<()> {
        let start = Utc::now();
        let store = InMemoryStore::with_keys(1, start)?;
        let policy = LeasePolicy::default();
        let lease = allocate_lease(&store, &policy, request("c-1", "i-1"), start).await?;
        let id = lease.lease_id.to_string();

        let first = renew_lease(&store, &policy, Some(&id), start + Duration::minutes(1)).await?;
        let second = renew_lease(&store, &policy, Some(&id), start + Duration::minutes(2)).await?;
        assert!(second.expires_at > first.expires_at);
        assert_eq!(second.last_heartbeat_at, start + Duration::minutes(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_heartbeat_after_release_is_not_found() -> ApiResult<()> {
        let now = Utc::now();
        let store = InMemoryStore::with_keys(1, now)?;
        let policy = LeasePolicy::default();
        let lease = allocate_lease(&store, &policy, request("c-1", "i-1"), now).await?;
        let id = lease.lease_id.to_string();

        let outcome = release_lease(&store, Some(&id), now).await?;
        assert!(outcome.released());

        let err = renew_lease(&store, &policy, Some(&id), now)
            .await
            .err()
            .map(|e| e.code);
        assert_eq!(err, Some(ErrorCode::LeaseNotFound));
        Ok(())
    }

    #[tokio::test]
    async fn test_double_release_decrements_once() -> ApiResult<()> {
        let now = Utc::now();
        let store = InMemoryStore::with_keys(1, now)?;
        let policy = LeasePolicy::default();
        let a = allocate_lease(&store, &policy, request("c-1", "i-1"), now).await?;
        allocate_lease(&store, &policy, request("c-2", "i-2"), now).await?;
        let id = a.lease_id.to_string();

        assert!(release_lease(&store, Some(&id), now).await?.released());
        assert!(!release_lease(&store, Some(&id), now).await?.released());

        let key = store.resource_get(a.key_index).await?;
        assert_eq!(key.map(|k| k.active_lease_count), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_reclaim_is_idempotent() -> ApiResult<()> {
        let start = Utc::now();
        let store = InMemoryStore::with_keys(2, start)?;
        let policy = LeasePolicy::default();
        allocate_lease(&store, &policy, request("c-1", "i-1"), start).await?;
        allocate_lease(&store, &policy, request("c-2", "i-2"), start).await?;

        let later = start + Duration::minutes(4);
        assert_eq!(reclaim_expired(&store, &policy, later).await?.len(), 2);
        assert!(reclaim_expired(&store, &policy, later).await?.is_empty());
        Ok(())
    }
}
