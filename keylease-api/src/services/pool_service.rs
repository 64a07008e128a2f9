//! Pool Service
//!
//! Bookkeeping for the key registry: provisioning, status, enabling keys,
//! counter reconciliation and credit refresh.

use keylease_core::{
    CountCorrection, KeyIndex, LeasePolicy, PoolResource, Timestamp, UsageProvider,
};
use keylease_storage::LeaseStore;
use std::collections::BTreeSet;

use crate::constants::CREDIT_CHECK_MIN_INTERVAL_SECS;
use crate::error::ApiResult;
use crate::telemetry::metrics::with_metrics;
use crate::types::{CreditRefreshEntry, CreditRefreshResponse, CreditRefreshStatus, PoolStatusResponse};

/// Make sure every configured key has a pool row. Existing rows keep
/// their counters.
pub async fn ensure_pool<S>(store: &S, key_indices: &[KeyIndex], now: Timestamp) -> ApiResult<usize>
where
    S: LeaseStore + ?Sized,
{
    let inserted = store.ensure_resources(key_indices, now).await?;
    tracing::info!(
        configured = key_indices.len(),
        inserted,
        "Key pool provisioned"
    );
    Ok(inserted)
}

/// Snapshot of every key and its lease count.
pub async fn pool_status<S>(store: &S, policy: &LeasePolicy) -> ApiResult<PoolStatusResponse>
where
    S: LeaseStore + ?Sized,
{
    let resources = store.resource_list().await?;
    let status = PoolStatusResponse::new(policy.capacity, resources);
    with_metrics(|m| m.set_active_leases(status.total_active_leases));
    Ok(status)
}

/// Enable or disable a key for new allocations.
pub async fn set_key_active<S>(
    store: &S,
    key_index: KeyIndex,
    is_active: bool,
    now: Timestamp,
) -> ApiResult<PoolResource>
where
    S: LeaseStore + ?Sized,
{
    // Unknown indices surface as KEY_NOT_FOUND
    let resource = store.resource_set_active(key_index, is_active, now).await?;
    tracing::info!(key_index, is_active, "Key availability changed");
    Ok(resource)
}

/// Recompute every counter from the active leases.
pub async fn reconcile_pool<S>(store: &S, now: Timestamp) -> ApiResult<Vec<CountCorrection>>
where
    S: LeaseStore + ?Sized,
{
    let corrections = store.reconcile_counts(now).await?;
    for c in &corrections {
        tracing::warn!(
            key_index = c.key_index,
            recorded = c.recorded,
            actual = c.actual,
            "Repaired lease counter drift"
        );
    }
    if !corrections.is_empty() {
        with_metrics(|m| m.record_corrections(corrections.len()));
    }
    Ok(corrections)
}

/// Fetch and store the remaining credits of each active key.
///
/// Keys checked within the last five minutes and keys without credentials
/// are skipped. A failing key is reported in the response and does not
/// stop the others.
pub async fn refresh_credits<S>(
    store: &S,
    usage: &dyn UsageProvider,
    now: Timestamp,
) -> ApiResult<CreditRefreshResponse>
where
    S: LeaseStore + ?Sized,
{
    let min_interval = chrono::Duration::seconds(CREDIT_CHECK_MIN_INTERVAL_SECS);
    let configured: BTreeSet<KeyIndex> = usage.configured_keys().into_iter().collect();
    let resources = store.resource_list().await?;

    let mut keys = Vec::with_capacity(resources.len());
    for resource in resources {
        let key_index = resource.key_index;
        if !resource.is_active {
            keys.push(CreditRefreshEntry::skipped(key_index, "key is disabled"));
            continue;
        }
        if !configured.contains(&key_index) {
            keys.push(CreditRefreshEntry::skipped(key_index, "no credentials configured"));
            continue;
        }
        if resource.credits_fresh(now, min_interval) {
            keys.push(CreditRefreshEntry::skipped(key_index, "checked recently"));
            continue;
        }

        let subscription = match usage.subscription(key_index).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(key_index, error = %e, "Credit check failed");
                keys.push(CreditRefreshEntry::failed(key_index, e.to_string()));
                continue;
            }
        };

        let available = subscription.available();
        if let Err(e) = store.record_credits(key_index, available, now).await {
            tracing::error!(key_index, error = %e, "Failed to store credit balance");
            keys.push(CreditRefreshEntry::failed(key_index, e.to_string()));
            continue;
        }

        tracing::info!(
            key_index,
            available_credits = available,
            character_count = subscription.character_count,
            character_limit = subscription.character_limit,
            "Credits updated"
        );
        keys.push(CreditRefreshEntry {
            key_index,
            status: CreditRefreshStatus::Updated,
            available_credits: Some(available),
            character_count: Some(subscription.character_count),
            character_limit: Some(subscription.character_limit),
            reason: None,
        });
    }

    let updated = keys
        .iter()
        .filter(|k| k.status == CreditRefreshStatus::Updated)
        .count();
    Ok(CreditRefreshResponse {
        checked_at: now,
        updated,
        keys,
    })
}
