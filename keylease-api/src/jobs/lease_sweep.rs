//! Lease Sweep Background Task
//!
//! Periodically expires leases whose holders stopped heartbeating and, when
//! enabled, repairs pool counters that drifted from the active lease count.
//! Allocation also reclaims before it picks a key, so the sweep only matters
//! for freeing capacity while no one is allocating.
//!
//! ```rust
//! use keylease_api::jobs::LeaseSweepConfig;
//! use std::time::Duration;
//!
//! let config = LeaseSweepConfig {
//!     sweep_interval: Duration::from_secs(60),
//!     reconcile: true,
//!     log_reclaims: true,
//! };
//! ```

use chrono::Utc;
use keylease_core::LeasePolicy;
use keylease_storage::LeaseStore;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::constants::DEFAULT_SWEEP_INTERVAL_SECS;
use crate::services::{reclaim_expired, reconcile_pool};
use crate::state::SharedStore;
use crate::telemetry::metrics::with_metrics;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the lease sweep task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSweepConfig {
    /// Time between sweeps (default: 60 seconds)
    pub sweep_interval: Duration,

    /// Reconcile counters after each sweep (default: true)
    pub reconcile: bool,

    /// Log every reclaimed lease at info level (default: true)
    pub log_reclaims: bool,
}

impl Default for LeaseSweepConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            reconcile: true,
            log_reclaims: true,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_lowercase() != "false")
        .unwrap_or(default)
}

impl LeaseSweepConfig {
    /// Create LeaseSweepConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `KEYLEASE_SWEEP_INTERVAL_SECS`: Time between sweeps (default: 60)
    /// - `KEYLEASE_SWEEP_RECONCILE`: Reconcile counters after sweeps (default: true)
    /// - `KEYLEASE_SWEEP_LOG_RECLAIMS`: Log each reclaimed lease (default: true)
    pub fn from_env() -> Self {
        let sweep_interval = Duration::from_secs(
            std::env::var("KEYLEASE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        );

        Self {
            sweep_interval,
            reconcile: env_flag("KEYLEASE_SWEEP_RECONCILE", true),
            log_reclaims: env_flag("KEYLEASE_SWEEP_LOG_RECLAIMS", true),
        }
    }

    /// Short interval for local runs, so abandoned sessions free up quickly.
    pub fn development() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            reconcile: true,
            log_reclaims: true,
        }
    }

    pub fn production() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            reconcile: true,
            log_reclaims: false,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the sweep task's lifetime.
#[derive(Debug, Default)]
pub struct LeaseSweepMetrics {
    /// Leases expired by this task
    pub leases_reclaimed: AtomicU64,

    /// Counters repaired by reconciliation
    pub counters_repaired: AtomicU64,

    /// Sweeps completed
    pub sweep_cycles: AtomicU64,

    /// Sweeps or reconciliations that failed
    pub sweep_errors: AtomicU64,

    /// Active leases across the pool after the latest sweep
    pub active_leases: AtomicI64,
}

impl LeaseSweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> LeaseSweepSnapshot {
        LeaseSweepSnapshot {
            leases_reclaimed: self.leases_reclaimed.load(Ordering::Relaxed),
            counters_repaired: self.counters_repaired.load(Ordering::Relaxed),
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
            active_leases: self.active_leases.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweep metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSweepSnapshot {
    pub leases_reclaimed: u64,
    pub counters_repaired: u64,
    pub sweep_cycles: u64,
    pub sweep_errors: u64,
    pub active_leases: i64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run sweeps until the shutdown signal flips to `true` or its sender drops.
///
/// Missed ticks are skipped rather than replayed. Returns the metrics
/// collected over the task's lifetime.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(lease_sweep_task(store, policy, config, shutdown_rx));
///
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn lease_sweep_task(
    store: SharedStore,
    policy: LeasePolicy,
    config: LeaseSweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<LeaseSweepMetrics> {
    let metrics = Arc::new(LeaseSweepMetrics::new());

    let mut sweep_interval = interval(config.sweep_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        heartbeat_window_secs = policy.heartbeat_window.as_secs(),
        reconcile = config.reconcile,
        "Lease sweep task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Lease sweep task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep_once(&store, &policy, &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        leases_reclaimed = snapshot.leases_reclaimed,
        counters_repaired = snapshot.counters_repaired,
        sweep_cycles = snapshot.sweep_cycles,
        sweep_errors = snapshot.sweep_errors,
        "Lease sweep task completed"
    );

    metrics
}

/// One sweep: reclaim, then optionally reconcile.
async fn sweep_once(
    store: &SharedStore,
    policy: &LeasePolicy,
    config: &LeaseSweepConfig,
    metrics: &LeaseSweepMetrics,
) {
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);
    let now = Utc::now();

    match reclaim_expired(store.as_ref(), policy, now).await {
        Ok(reclaimed) if !reclaimed.is_empty() => {
            metrics
                .leases_reclaimed
                .fetch_add(reclaimed.len() as u64, Ordering::Relaxed);
            if config.log_reclaims {
                tracing::info!(count = reclaimed.len(), "Sweep reclaimed stale leases");
            }
        }
        Ok(_) => tracing::trace!("Sweep found no stale leases"),
        Err(e) => {
            tracing::error!(error = %e.message, "Lease sweep failed");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    if config.reconcile {
        match reconcile_pool(store.as_ref(), now).await {
            Ok(corrections) => {
                metrics
                    .counters_repaired
                    .fetch_add(corrections.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(error = %e.message, "Counter reconciliation failed");
                metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    match store.resource_list().await {
        Ok(resources) => {
            let active: i64 = resources.iter().map(|r| i64::from(r.active_lease_count)).sum();
            metrics.active_leases.store(active, Ordering::Relaxed);
            with_metrics(|m| m.set_active_leases(active));
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read pool for the active lease gauge");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::allocate_lease;
    use crate::types::AllocateRequest;
    use keylease_storage::InMemoryStore;

    #[test]
    fn test_config_default() {
        let config = LeaseSweepConfig::default();
        assert_eq!(
            config.sweep_interval,
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS)
        );
        assert!(config.reconcile);
        assert!(config.log_reclaims);
    }

    #[test]
    fn test_config_presets() {
        assert_eq!(
            LeaseSweepConfig::development().sweep_interval,
            Duration::from_secs(10)
        );
        assert!(!LeaseSweepConfig::production().log_reclaims);
    }

    #[tokio::test]
    async fn test_sweep_once_reclaims_and_counts() -> Result<(), String> {
        let start = Utc::now() - chrono::Duration::minutes(10);
        let memory = InMemoryStore::with_keys(1, start).map_err(|e| e.to_string())?;
        let store: SharedStore = Arc::new(memory);
        let policy = LeasePolicy::default();

        allocate_lease(
            store.as_ref(),
            &policy,
            AllocateRequest {
                candidate_id: "c-1".to_string(),
                interview_id: "i-1".to_string(),
            },
            start,
        )
        .await
        .map_err(|e| e.message)?;

        let metrics = LeaseSweepMetrics::new();
        sweep_once(&store, &policy, &LeaseSweepConfig::default(), &metrics).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.leases_reclaimed, 1);
        assert_eq!(snapshot.sweep_cycles, 1);
        assert_eq!(snapshot.sweep_errors, 0);

        let key = store.resource_get(0).await.map_err(|e| e.to_string())?;
        assert_eq!(key.map(|k| k.active_lease_count), Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_sweep_without_reconcile_still_reports_active_leases() -> Result<(), String> {
        let now = Utc::now();
        let memory = InMemoryStore::with_keys(2, now).map_err(|e| e.to_string())?;
        let store: SharedStore = Arc::new(memory);
        let policy = LeasePolicy::default();

        for n in 0..3 {
            allocate_lease(
                store.as_ref(),
                &policy,
                AllocateRequest {
                    candidate_id: format!("c-{}", n),
                    interview_id: "i-1".to_string(),
                },
                now,
            )
            .await
            .map_err(|e| e.message)?;
        }

        let config = LeaseSweepConfig {
            reconcile: false,
            ..LeaseSweepConfig::default()
        };
        let metrics = LeaseSweepMetrics::new();
        sweep_once(&store, &policy, &config, &metrics).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.leases_reclaimed, 0);
        assert_eq!(snapshot.counters_repaired, 0);
        assert_eq!(snapshot.active_leases, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() -> Result<(), String> {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(lease_sweep_task(
            store,
            LeasePolicy::default(),
            LeaseSweepConfig::development(),
            rx,
        ));

        tx.send(true).map_err(|e| e.to_string())?;
        let metrics = handle.await.map_err(|e| e.to_string())?;
        // The first tick fires immediately, so at most one sweep ran
        assert!(metrics.snapshot().sweep_cycles <= 1);
        Ok(())
    }
}
