//! Identity types for leases, pool keys and uploads

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lease identifier using UUIDv7 so ids sort by issue time.
pub type LeaseId = Uuid;

/// Position of an API key in the configured pool.
pub type KeyIndex = i32;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Client-chosen identifier that groups the chunks of one recording.
pub type UploadId = String;

/// Generate a new UUIDv7 lease id.
pub fn new_lease_id() -> LeaseId {
    Uuid::now_v7()
}

/// Whole minutes elapsed from `earlier` to `later`, floored, never negative.
pub fn whole_minutes_between(earlier: Timestamp, later: Timestamp) -> i64 {
    (later - earlier).num_minutes().max(0)
}
