//! Pool entries: one row per external API key.

use crate::{KeyIndex, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A pooled API key and its lease counter.
///
/// The key material itself never appears here; it stays in process
/// configuration and is looked up by `key_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolResource {
    pub key_index: KeyIndex,
    pub is_active: bool,
    /// Number of leases in `Active` status on this key
    pub active_lease_count: i32,
    /// `None` until the key is first leased
    pub last_used_at: Option<Timestamp>,
    pub available_credits: Option<i64>,
    pub last_credit_check: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PoolResource {
    /// A freshly provisioned, never-used key.
    pub fn provision(key_index: KeyIndex, now: Timestamp) -> Self {
        Self {
            key_index,
            is_active: true,
            active_lease_count: 0,
            last_used_at: None,
            available_credits: None,
            last_credit_check: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active and below `capacity`.
    pub fn is_eligible(&self, capacity: i32) -> bool {
        self.is_active && self.active_lease_count < capacity
    }

    /// Record a new lease on this key.
    pub fn take_slot(&mut self, now: Timestamp) {
        self.active_lease_count += 1;
        self.last_used_at = Some(now);
        self.updated_at = now;
    }

    /// Free one slot, never going below zero.
    pub fn free_slot(&mut self, now: Timestamp) {
        self.active_lease_count = (self.active_lease_count - 1).max(0);
        self.updated_at = now;
    }

    /// Whether a credit check at `now` would be too soon after the last one.
    pub fn credits_fresh(&self, now: Timestamp, min_interval: chrono::Duration) -> bool {
        self.last_credit_check
            .map(|checked| now - checked <= min_interval)
            .unwrap_or(false)
    }
}

/// Least-recently-used order: never-used keys first, then oldest
/// `last_used_at`, then lowest index.
pub fn lru_order(a: &PoolResource, b: &PoolResource) -> Ordering {
    match (a.last_used_at, b.last_used_at) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    }
    .then(a.key_index.cmp(&b.key_index))
}

/// Pick the eligible key that was used least recently.
pub fn select_least_recently_used<'a, I>(resources: I, capacity: i32) -> Option<&'a PoolResource>
where
    I: IntoIterator<Item = &'a PoolResource>,
{
    resources
        .into_iter()
        .filter(|r| r.is_eligible(capacity))
        .min_by(|a, b| lru_order(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    fn resource(index: KeyIndex, count: i32, used_minutes_ago: Option<i64>) -> PoolResource {
        let now = Utc::now();
        let mut r = PoolResource::provision(index, now);
        r.active_lease_count = count;
        r.last_used_at = used_minutes_ago.map(|m| now - Duration::minutes(m));
        r
    }

    #[test]
    fn test_never_used_key_wins() {
        let pool = vec![resource(0, 0, Some(60)), resource(1, 0, None)];
        let chosen = select_least_recently_used(&pool, 5).map(|r| r.key_index);
        assert_eq!(chosen, Some(1));
    }

    #[test]
    fn test_oldest_use_wins() {
        let pool = vec![
            resource(0, 1, Some(5)),
            resource(1, 1, Some(50)),
            resource(2, 1, Some(10)),
        ];
        let chosen = select_least_recently_used(&pool, 5).map(|r| r.key_index);
        assert_eq!(chosen, Some(1));
    }

    #[test]
    fn test_full_and_inactive_keys_skipped() {
        let mut inactive = resource(2, 0, None);
        inactive.is_active = false;
        let pool = vec![resource(0, 5, None), resource(1, 4, Some(1)), inactive];
        let chosen = select_least_recently_used(&pool, 5).map(|r| r.key_index);
        assert_eq!(chosen, Some(1));
    }

    #[test]
    fn test_exhausted_pool_returns_none() {
        let pool = vec![resource(0, 5, None), resource(1, 5, None)];
        assert!(select_least_recently_used(&pool, 5).is_none());
    }

    #[test]
    fn test_free_slot_floors_at_zero() {
        let mut r = resource(0, 0, None);
        r.free_slot(Utc::now());
        assert_eq!(r.active_lease_count, 0);
    }

    #[test]
    fn test_credits_fresh_window() {
        let now = Utc::now();
        let mut r = resource(0, 0, None);
        assert!(!r.credits_fresh(now, Duration::minutes(5)));
        r.last_credit_check = Some(now - Duration::minutes(2));
        assert!(r.credits_fresh(now, Duration::minutes(5)));
        r.last_credit_check = Some(now - Duration::minutes(6));
        assert!(!r.credits_fresh(now, Duration::minutes(5)));
    }

    proptest! {
        #[test]
        fn prop_selection_is_eligible_and_lru(
            counts in prop::collection::vec((0i32..=6, prop::option::of(0i64..1000)), 1..12)
        ) {
            let pool: Vec<PoolResource> = counts
                .iter()
                .enumerate()
                .map(|(i, (c, used))| resource(i as KeyIndex, *c, *used))
                .collect();

            match select_least_recently_used(&pool, 5) {
                Some(chosen) => {
                    prop_assert!(chosen.active_lease_count < 5);
                    for other in pool.iter().filter(|r| r.is_eligible(5)) {
                        prop_assert_ne!(lru_order(other, chosen), Ordering::Less);
                    }
                }
                None => prop_assert!(pool.iter().all(|r| !r.is_eligible(5))),
            }
        }
    }
}
