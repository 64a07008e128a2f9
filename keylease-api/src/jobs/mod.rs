//! Background Jobs for KEYLEASE API
//!
//! - `lease_sweep`: expires abandoned leases and reconciles pool counters
//!
//! Spawned from `main` with a `watch` channel that signals shutdown:
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(lease_sweep_task(store, policy, LeaseSweepConfig::from_env(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod lease_sweep;

pub use lease_sweep::{lease_sweep_task, LeaseSweepConfig, LeaseSweepMetrics, LeaseSweepSnapshot};
