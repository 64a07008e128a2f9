//! Lease-related API types

use chrono::{DateTime, Utc};
use keylease_core::{KeyIndex, Lease, LeaseId, ReclaimedLease, Timestamp};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ============================================================================
// REQUESTS
// ============================================================================

/// Request a lease on one pooled API key.
///
/// Fields default to empty so that a missing field is reported as
/// `MISSING_FIELD` instead of a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllocateRequest {
    /// Candidate (holder) the lease is issued to
    #[serde(default)]
    pub candidate_id: String,
    /// Interview (context) the lease is used for
    #[serde(default)]
    pub interview_id: String,
}

/// Heartbeat for an active lease.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    /// Lease identifier returned by allocate
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Release a lease.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeallocateRequest {
    /// Lease identifier returned by allocate
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Single entry point carrying one of the lease operations, selected by
/// the `action` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum LoadBalancingRequest {
    Allocate(AllocateRequest),
    Heartbeat(HeartbeatRequest),
    Deallocate(DeallocateRequest),
    Cleanup,
}

// ============================================================================
// RESPONSES
// ============================================================================

/// A freshly issued lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllocateResponse {
    pub success: bool,
    /// Lease identifier, used for heartbeat and deallocate
    #[schema(value_type = String, format = Uuid)]
    pub session_id: LeaseId,
    /// Index of the pooled key the holder should use
    pub key_index: KeyIndex,
    pub expires_at: DateTime<Utc>,
    pub allocated_at: DateTime<Utc>,
}

impl From<&Lease> for AllocateResponse {
    fn from(lease: &Lease) -> Self {
        Self {
            success: true,
            session_id: lease.lease_id,
            key_index: lease.key_index,
            expires_at: lease.expires_at,
            allocated_at: lease.issued_at,
        }
    }
}

/// State of a lease after a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub success: bool,
    #[schema(value_type = String, format = Uuid)]
    pub session_id: LeaseId,
    pub expires_at: DateTime<Utc>,
    /// Whole minutes until expiry
    pub remaining_minutes: i64,
    pub api_key_index: KeyIndex,
}

impl HeartbeatResponse {
    pub fn from_lease(lease: &Lease, now: Timestamp) -> Self {
        Self {
            success: true,
            session_id: lease.lease_id,
            expires_at: lease.expires_at,
            remaining_minutes: lease.remaining_minutes(now),
            api_key_index: lease.key_index,
        }
    }
}

/// Outcome of a release. `released` is false when the lease was already
/// inactive or unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeallocateResponse {
    pub success: bool,
    pub released: bool,
}

/// One lease expired by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimedLeaseResponse {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: LeaseId,
    pub candidate_id: String,
    pub interview_id: String,
    pub key_index: KeyIndex,
    pub last_heartbeat_at: DateTime<Utc>,
    pub minutes_since_heartbeat: i64,
    /// Active leases left on the key after this one was freed
    pub key_active_leases: i32,
}

impl From<ReclaimedLease> for ReclaimedLeaseResponse {
    fn from(r: ReclaimedLease) -> Self {
        Self {
            session_id: r.lease_id,
            candidate_id: r.holder_id,
            interview_id: r.context_id,
            key_index: r.key_index,
            last_heartbeat_at: r.last_heartbeat_at,
            minutes_since_heartbeat: r.minutes_since_heartbeat,
            key_active_leases: r.key_active_leases_after,
        }
    }
}

/// Result of a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub success: bool,
    /// Number of leases expired by this sweep
    pub expired_sessions: usize,
    pub cleanup_results: Vec<ReclaimedLeaseResponse>,
    pub timestamp: DateTime<Utc>,
}

impl CleanupResponse {
    pub fn new(reclaimed: Vec<ReclaimedLease>, now: Timestamp) -> Self {
        let cleanup_results: Vec<ReclaimedLeaseResponse> =
            reclaimed.into_iter().map(Into::into).collect();
        Self {
            success: true,
            expired_sessions: cleanup_results.len(),
            cleanup_results,
            timestamp: now,
        }
    }
}

/// Response of the single entry point; shape follows the requested action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum LoadBalancingResponse {
    Allocate(AllocateResponse),
    Heartbeat(HeartbeatResponse),
    Deallocate(DeallocateResponse),
    Cleanup(CleanupResponse),
}
