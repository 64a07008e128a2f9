//! Pool-related API types

use chrono::{DateTime, Utc};
use keylease_core::{KeyIndex, PoolResource};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One pooled key as seen from outside. Key material is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolKeyResponse {
    pub key_index: KeyIndex,
    pub is_active: bool,
    pub active_lease_count: i32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub available_credits: Option<i64>,
    pub last_credit_check: Option<DateTime<Utc>>,
}

impl From<PoolResource> for PoolKeyResponse {
    fn from(r: PoolResource) -> Self {
        Self {
            key_index: r.key_index,
            is_active: r.is_active,
            active_lease_count: r.active_lease_count,
            last_used_at: r.last_used_at,
            available_credits: r.available_credits,
            last_credit_check: r.last_credit_check,
        }
    }
}

/// Snapshot of the whole pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatusResponse {
    /// Maximum concurrent leases per key
    pub capacity: i32,
    pub total_active_leases: i64,
    /// Free slots across active keys
    pub available_slots: i64,
    pub keys: Vec<PoolKeyResponse>,
}

impl PoolStatusResponse {
    pub fn new(capacity: i32, resources: Vec<PoolResource>) -> Self {
        let total_active_leases = resources
            .iter()
            .map(|r| i64::from(r.active_lease_count))
            .sum();
        let available_slots = resources
            .iter()
            .filter(|r| r.is_active)
            .map(|r| i64::from((capacity - r.active_lease_count).max(0)))
            .sum();
        Self {
            capacity,
            total_active_leases,
            available_slots,
            keys: resources.into_iter().map(Into::into).collect(),
        }
    }
}

/// Enable or disable a key for new allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetKeyActiveRequest {
    pub is_active: bool,
}

/// What happened to one key during a credit refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CreditRefreshStatus {
    /// Balance fetched and stored
    Updated,
    /// Checked recently, or no credentials configured
    Skipped,
    /// Provider call failed
    Failed,
}

/// Per-key credit refresh result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditRefreshEntry {
    pub key_index: KeyIndex,
    pub status: CreditRefreshStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_credits: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CreditRefreshEntry {
    pub fn skipped(key_index: KeyIndex, reason: impl Into<String>) -> Self {
        Self {
            key_index,
            status: CreditRefreshStatus::Skipped,
            available_credits: None,
            character_count: None,
            character_limit: None,
            reason: Some(reason.into()),
        }
    }

    pub fn failed(key_index: KeyIndex, reason: impl Into<String>) -> Self {
        Self {
            status: CreditRefreshStatus::Failed,
            ..Self::skipped(key_index, reason)
        }
    }
}

/// Result of a credit refresh over the whole pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditRefreshResponse {
    pub checked_at: DateTime<Utc>,
    pub updated: usize,
    pub keys: Vec<CreditRefreshEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_totals() {
        let now = Utc::now();
        let mut busy = PoolResource::provision(0, now);
        busy.active_lease_count = 5;
        let mut half = PoolResource::provision(1, now);
        half.active_lease_count = 2;
        let mut disabled = PoolResource::provision(2, now);
        disabled.is_active = false;

        let status = PoolStatusResponse::new(5, vec![busy, half, disabled]);
        assert_eq!(status.total_active_leases, 7);
        assert_eq!(status.available_slots, 3);
        assert_eq!(status.keys.len(), 3);
    }

    #[test]
    fn test_failed_entry_keeps_reason() {
        let entry = CreditRefreshEntry::failed(3, "status 401");
        assert_eq!(entry.status, CreditRefreshStatus::Failed);
        assert_eq!(entry.reason.as_deref(), Some("status 401"));
    }
}
