//! Lease policy: pool capacity and the two expiry clocks.
//!
//! A lease lives at most `lease_ttl` from issue. Within that ceiling it stays
//! alive only while heartbeats keep arriving at least every
//! `heartbeat_window`.

use crate::{ConfigError, Timestamp};
use std::time::Duration;

/// Default number of concurrent leases per API key.
pub const DEFAULT_POOL_CAPACITY: i32 = 5;

/// Default hard ceiling on a lease's lifetime (2 hours).
pub const DEFAULT_LEASE_TTL_SECS: u64 = 2 * 60 * 60;

/// Default heartbeat window (3 minutes).
pub const DEFAULT_HEARTBEAT_WINDOW_SECS: u64 = 3 * 60;

/// Capacity and timing rules applied to every lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    /// Maximum active leases per API key
    pub capacity: i32,
    /// Hard ceiling measured from `issued_at`
    pub lease_ttl: Duration,
    /// Maximum silence between heartbeats
    pub heartbeat_window: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
            heartbeat_window: Duration::from_secs(DEFAULT_HEARTBEAT_WINDOW_SECS),
        }
    }
}

impl LeasePolicy {
    /// Reject policies that could never grant or keep a lease.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity < 1 {
            return Err(ConfigError::InvalidValue {
                field: "capacity".to_string(),
                value: self.capacity.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.heartbeat_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_window".to_string(),
                value: "0s".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.lease_ttl < self.heartbeat_window {
            return Err(ConfigError::InvalidValue {
                field: "lease_ttl".to_string(),
                value: format!("{}s", self.lease_ttl.as_secs()),
                reason: "must not be shorter than the heartbeat window".to_string(),
            });
        }
        Ok(())
    }

    /// `lease_ttl` as a chrono duration.
    pub fn ttl(&self) -> chrono::Duration {
        to_chrono(self.lease_ttl)
    }

    /// `heartbeat_window` as a chrono duration.
    pub fn window(&self) -> chrono::Duration {
        to_chrono(self.heartbeat_window)
    }

    /// Expiry for a lease issued at `issued_at`.
    pub fn initial_expiry(&self, issued_at: Timestamp) -> Timestamp {
        issued_at + self.ttl()
    }

    /// Instant after which a lease can never be renewed.
    pub fn hard_ceiling(&self, issued_at: Timestamp) -> Timestamp {
        issued_at + self.ttl()
    }

    /// Expiry after a heartbeat at `now`, capped by the hard ceiling.
    pub fn renewed_expiry(&self, issued_at: Timestamp, now: Timestamp) -> Timestamp {
        (now + self.window()).min(self.hard_ceiling(issued_at))
    }

    /// Heartbeats older than this instant mark a lease as abandoned.
    pub fn stale_before(&self, now: Timestamp) -> Timestamp {
        now - self.window()
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    // Out-of-range durations clamp to a century.
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
