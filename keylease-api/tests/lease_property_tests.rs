//! Property-Based Tests for Lease Accounting
//!
//! For any sequence of allocate, heartbeat, release, sweep and clock steps
//! against the in-memory store:
//! - every key's counter equals its number of active leases
//! - no key ever holds more than `capacity` active leases
//! - allocation only fails when every active key is full
//! - a renewed lease never outlives `issued_at + lease_ttl`

use std::sync::Arc;

use chrono::Duration;
use futures_util::future::join_all;
use keylease_api::{
    services::{allocate_lease, reclaim_expired, release_lease, renew_lease},
    AllocateRequest, ApiError, ErrorCode,
};
use keylease_core::LeaseId;
use keylease_test_utils::{
    assertions::assert_counters_consistent,
    fixtures,
    generators::{arb_allocation_request, arb_lease_ops, arb_policy, LeaseOp},
    InMemoryStore, LeasePolicy, LeaseStore,
};
use proptest::prelude::*;
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn request(n: usize) -> AllocateRequest {
    AllocateRequest {
        candidate_id: format!("cand-{}", n),
        interview_id: format!("int-{}", n),
    }
}

fn fail(e: impl std::fmt::Display) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

/// Drive one operation sequence and check the invariants after every step.
async fn run_sequence(
    key_count: usize,
    policy: LeasePolicy,
    ops: Vec<LeaseOp>,
) -> Result<(), TestCaseError> {
    let store = fixtures::store_with_keys(key_count).map_err(fail)?;
    let mut now = fixtures::fixed_now();
    let mut issued: Vec<LeaseId> = Vec::new();
    let ttl = Duration::from_std(policy.lease_ttl).map_err(fail)?;

    for (step, op) in ops.into_iter().enumerate() {
        match op {
            LeaseOp::Allocate => match allocate_lease(&store, &policy, request(step), now).await {
                Ok(lease) => issued.push(lease.lease_id),
                Err(e) => {
                    prop_assert_eq!(e.code, ErrorCode::PoolExhausted);
                    for resource in store.resource_list().await.map_err(fail)? {
                        prop_assert!(
                            !resource.is_active || resource.active_lease_count >= policy.capacity,
                            "key {} had room but allocation failed",
                            resource.key_index
                        );
                    }
                }
            },
            LeaseOp::Heartbeat(n) if !issued.is_empty() => {
                let id = issued[n % issued.len()].to_string();
                match renew_lease(&store, &policy, Some(&id), now).await {
                    Ok(lease) => {
                        prop_assert!(lease.expires_at <= lease.issued_at + ttl);
                        prop_assert!(lease.is_active());
                    }
                    Err(e) => prop_assert_eq!(e.code, ErrorCode::LeaseNotFound),
                }
            }
            LeaseOp::Release(n) if !issued.is_empty() => {
                let id = issued[n % issued.len()].to_string();
                release_lease(&store, Some(&id), now).await.map_err(fail)?;
            }
            LeaseOp::Advance(minutes) => now += Duration::minutes(minutes),
            LeaseOp::Reclaim => {
                reclaim_expired(&store, &policy, now).await.map_err(fail)?;
            }
            LeaseOp::Heartbeat(_) | LeaseOp::Release(_) => {}
        }

        assert_counters_consistent(&store, &policy)
            .await
            .map_err(fail)?;
    }
    Ok(())
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Counters track active leases through any workload.
    #[test]
    fn prop_counters_track_active_leases(
        key_count in 1usize..4,
        policy in arb_policy(),
        ops in arb_lease_ops(40),
    ) {
        let rt = test_runtime()?;
        rt.block_on(run_sequence(key_count, policy, ops))?;
    }

    /// Any well-formed request on an idle pool gets the full TTL and the
    /// holder and context it asked for.
    #[test]
    fn prop_fresh_lease_carries_request(req in arb_allocation_request()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let policy = LeasePolicy::default();
            let store = fixtures::store_with_keys(1).map_err(fail)?;
            let now = fixtures::fixed_now();
            let lease = allocate_lease(
                &store,
                &policy,
                AllocateRequest {
                    candidate_id: req.holder_id.clone(),
                    interview_id: req.context_id.clone(),
                },
                now,
            )
            .await
            .map_err(fail)?;

            let ttl = Duration::from_std(policy.lease_ttl).map_err(fail)?;
            prop_assert_eq!(&lease.holder_id, &req.holder_id);
            prop_assert_eq!(&lease.context_id, &req.context_id);
            prop_assert_eq!(lease.key_index, 0);
            prop_assert_eq!(lease.expires_at, now + ttl);
            prop_assert_eq!(lease.last_heartbeat_at, now);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// A second sweep at the same instant finds nothing.
    #[test]
    fn prop_reclaim_is_idempotent(
        allocations in 1usize..8,
        silent_minutes in 0i64..30,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let policy = LeasePolicy::default();
            let store = fixtures::store_with_keys(2).map_err(fail)?;
            for n in 0..allocations {
                // Capacity may run out; that is fine here
                let _ = allocate_lease(&store, &policy, request(n), fixtures::fixed_now()).await;
            }

            let later = fixtures::minutes_after(silent_minutes);
            let first = reclaim_expired(&store, &policy, later).await.map_err(fail)?;
            let second = reclaim_expired(&store, &policy, later).await.map_err(fail)?;
            prop_assert!(second.is_empty());
            if silent_minutes > 3 {
                prop_assert_eq!(first.len(), allocations.min(10));
            }
            assert_counters_consistent(&store, &policy).await.map_err(fail)?;
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_never_oversubscribe() -> Result<(), ApiError> {
    let store = Arc::new(fixtures::store_with_keys(1)?);
    let policy = LeasePolicy::default();
    let now = fixtures::fixed_now();

    let handles = (0..12).map(|n| {
        let store = store.clone();
        tokio::spawn(async move { allocate_lease(store.as_ref(), &policy, request(n), now).await })
    });
    let results = join_all(handles).await;

    let mut granted = 0;
    let mut exhausted = 0;
    for result in results {
        match result.map_err(|e| ApiError::internal_error(e.to_string()))? {
            Ok(_) => granted += 1,
            Err(e) if e.code == ErrorCode::PoolExhausted => exhausted += 1,
            Err(e) => return Err(e),
        }
    }
    assert_eq!(granted, 5);
    assert_eq!(exhausted, 7);
    assert_counters_consistent(store.as_ref(), &policy).await?;
    Ok(())
}

#[tokio::test]
async fn released_slot_is_reused() -> Result<(), ApiError> {
    let store = fixtures::store_with_keys(1)?;
    let policy = LeasePolicy::default();
    let now = fixtures::fixed_now();

    let mut leases = Vec::new();
    for n in 0..5 {
        leases.push(allocate_lease(&store, &policy, request(n), now).await?);
    }
    let err = allocate_lease(&store, &policy, request(5), now)
        .await
        .err()
        .map(|e| e.code);
    assert_eq!(err, Some(ErrorCode::PoolExhausted));

    let freed = leases[2].lease_id.to_string();
    assert!(release_lease(&store, Some(&freed), now).await?.released());
    let again = allocate_lease(&store, &policy, request(6), now).await?;
    assert_eq!(again.key_index, 0);
    assert_counters_consistent(&store, &policy).await?;
    Ok(())
}

#[tokio::test]
async fn heartbeats_cannot_pass_the_hard_ceiling() -> Result<(), ApiError> {
    let store = InMemoryStore::with_keys(1, fixtures::fixed_now())?;
    let policy = LeasePolicy::default();
    let lease = allocate_lease(&store, &policy, request(0), fixtures::fixed_now()).await?;
    let id = lease.lease_id.to_string();

    // Keep heartbeating every two minutes up to the two hour ceiling
    let mut minute = 2;
    while minute < 120 {
        let renewed = renew_lease(&store, &policy, Some(&id), fixtures::minutes_after(minute)).await?;
        assert!(renewed.expires_at <= lease.issued_at + Duration::hours(2));
        minute += 2;
    }

    let past = renew_lease(&store, &policy, Some(&id), fixtures::minutes_after(121)).await;
    assert_eq!(past.err().map(|e| e.code), Some(ErrorCode::LeaseNotFound));
    Ok(())
}
