//! Leases: time-bounded claims on one slot of a pooled API key.
//!
//! ```text
//! allocate ──→ Active ──release──→ Completed
//!                │ ↺ heartbeat
//!                └──── sweep ────→ Expired
//! ```
//!
//! `Completed` and `Expired` are terminal. Only `Active` leases count
//! against their key's capacity.

use crate::{whole_minutes_between, KeyIndex, LeaseId, LeasePolicy, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LEASE STATUS
// ============================================================================

/// Lifecycle state of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    /// Holder is using the key
    Active,
    /// Holder released the key
    Completed,
    /// Reclaimed after the holder stopped heartbeating
    Expired,
}

impl LeaseStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            LeaseStatus::Active => "active",
            LeaseStatus::Completed => "completed",
            LeaseStatus::Expired => "expired",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, LeaseStatusParseError> {
        match s.to_lowercase().as_str() {
            "active" => Ok(LeaseStatus::Active),
            "completed" => Ok(LeaseStatus::Completed),
            "expired" => Ok(LeaseStatus::Expired),
            _ => Err(LeaseStatusParseError(s.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LeaseStatus::Active)
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for LeaseStatus {
    type Err = LeaseStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid lease status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseStatusParseError(pub String);

impl fmt::Display for LeaseStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid lease status: {}", self.0)
    }
}

impl std::error::Error for LeaseStatusParseError {}

// ============================================================================
// LEASE
// ============================================================================

/// Who is asking for a key, and for which interview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Candidate holding the lease
    pub holder_id: String,
    /// Interview the lease is used for
    pub context_id: String,
}

/// A persisted lease row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: LeaseId,
    pub key_index: KeyIndex,
    pub holder_id: String,
    pub context_id: String,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub last_heartbeat_at: Timestamp,
    pub updated_at: Timestamp,
    pub status: LeaseStatus,
}

impl Lease {
    /// Build a fresh active lease on `key_index`.
    pub fn issue(
        lease_id: LeaseId,
        key_index: KeyIndex,
        request: &AllocationRequest,
        policy: &LeasePolicy,
        now: Timestamp,
    ) -> Self {
        Self {
            lease_id,
            key_index,
            holder_id: request.holder_id.clone(),
            context_id: request.context_id.clone(),
            issued_at: now,
            expires_at: policy.initial_expiry(now),
            last_heartbeat_at: now,
            updated_at: now,
            status: LeaseStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LeaseStatus::Active
    }

    /// Active, but silent for longer than the heartbeat window or past expiry.
    pub fn is_reclaimable(&self, policy: &LeasePolicy, now: Timestamp) -> bool {
        self.is_active()
            && (self.last_heartbeat_at < policy.stale_before(now) || self.expires_at < now)
    }

    /// Active and still under the hard ceiling.
    pub fn is_renewable(&self, policy: &LeasePolicy, now: Timestamp) -> bool {
        self.is_active() && now < policy.hard_ceiling(self.issued_at)
    }

    /// Apply a heartbeat at `now`. Caller checks `is_renewable` first.
    pub fn renew(&mut self, policy: &LeasePolicy, now: Timestamp) {
        self.last_heartbeat_at = now;
        self.expires_at = policy.renewed_expiry(self.issued_at, now);
        self.updated_at = now;
    }

    /// Move to a terminal status.
    pub fn close(&mut self, status: LeaseStatus, now: Timestamp) {
        self.status = status;
        self.updated_at = now;
    }

    /// Whole minutes until expiry, floored at zero.
    pub fn remaining_minutes(&self, now: Timestamp) -> i64 {
        whole_minutes_between(now, self.expires_at)
    }
}

// ============================================================================
// OPERATION OUTCOMES
// ============================================================================

/// A lease expired by the sweeper, with the state of its key afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReclaimedLease {
    pub lease_id: LeaseId,
    pub holder_id: String,
    pub context_id: String,
    pub key_index: KeyIndex,
    pub last_heartbeat_at: Timestamp,
    pub minutes_since_heartbeat: i64,
    pub key_active_leases_after: i32,
}

impl ReclaimedLease {
    pub fn from_lease(lease: &Lease, key_active_leases_after: i32, now: Timestamp) -> Self {
        Self {
            lease_id: lease.lease_id,
            holder_id: lease.holder_id.clone(),
            context_id: lease.context_id.clone(),
            key_index: lease.key_index,
            last_heartbeat_at: lease.last_heartbeat_at,
            minutes_since_heartbeat: whole_minutes_between(lease.last_heartbeat_at, now),
            key_active_leases_after,
        }
    }
}

/// Result of releasing a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lease was active and its key slot was freed
    Released { key_index: KeyIndex },
    /// The lease was missing or already terminal
    AlreadyInactive,
}

impl ReleaseOutcome {
    pub fn released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released { .. })
    }
}

/// A counter repaired by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountCorrection {
    pub key_index: KeyIndex,
    pub recorded: i32,
    pub actual: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_lease_id;
    use chrono::{Duration, Utc};

    fn request() -> AllocationRequest {
        AllocationRequest {
            holder_id: "candidate-1".to_string(),
            context_id: "interview-1".to_string(),
        }
    }

    #[test]
    fn test_status_db_roundtrip() {
        for status in [LeaseStatus::Active, LeaseStatus::Completed, LeaseStatus::Expired] {
            assert_eq!(LeaseStatus::from_db_str(status.as_db_str()), Ok(status));
        }
        assert!(LeaseStatus::from_db_str("pending").is_err());
        assert_eq!("ACTIVE".parse::<LeaseStatus>(), Ok(LeaseStatus::Active));
    }

    #[test]
    fn test_issue_sets_ttl_and_heartbeat() {
        let policy = LeasePolicy::default();
        let now = Utc::now();
        let lease = Lease::issue(new_lease_id(), 2, &request(), &policy, now);
        assert_eq!(lease.status, LeaseStatus::Active);
        assert_eq!(lease.expires_at, now + Duration::hours(2));
        assert_eq!(lease.last_heartbeat_at, now);
    }

    #[test]
    fn test_reclaimable_after_heartbeat_window() {
        let policy = LeasePolicy::default();
        let now = Utc::now();
        let lease = Lease::issue(new_lease_id(), 0, &request(), &policy, now);
        assert!(!lease.is_reclaimable(&policy, now + Duration::minutes(3)));
        assert!(lease.is_reclaimable(&policy, now + Duration::minutes(3) + Duration::seconds(1)));
    }

    #[test]
    fn test_terminal_lease_not_reclaimable() {
        let policy = LeasePolicy::default();
        let now = Utc::now();
        let mut lease = Lease::issue(new_lease_id(), 0, &request(), &policy, now);
        lease.close(LeaseStatus::Completed, now);
        assert!(!lease.is_reclaimable(&policy, now + Duration::hours(5)));
        assert!(!lease.is_renewable(&policy, now));
    }

    #[test]
    fn test_renew_moves_expiry_forward() {
        let policy = LeasePolicy::default();
        let now = Utc::now();
        let mut lease = Lease::issue(new_lease_id(), 0, &request(), &policy, now);
        lease.renew(&policy, now + Duration::minutes(1));
        let first = lease.expires_at;
        lease.renew(&policy, now + Duration::minutes(2));
        assert!(lease.expires_at > first);
        assert_eq!(lease.remaining_minutes(now + Duration::minutes(2)), 3);
    }

    #[test]
    fn test_not_renewable_past_ceiling() {
        let policy = LeasePolicy::default();
        let now = Utc::now();
        let lease = Lease::issue(new_lease_id(), 0, &request(), &policy, now);
        assert!(!lease.is_renewable(&policy, now + Duration::hours(2)));
    }

    #[test]
    fn test_reclaimed_lease_minutes_since_heartbeat() {
        let policy = LeasePolicy::default();
        let now = Utc::now();
        let lease = Lease::issue(new_lease_id(), 4, &request(), &policy, now);
        let reclaimed = ReclaimedLease::from_lease(&lease, 1, now + Duration::minutes(7));
        assert_eq!(reclaimed.minutes_since_heartbeat, 7);
        assert_eq!(reclaimed.key_index, 4);
        assert_eq!(reclaimed.key_active_leases_after, 1);
    }
}
