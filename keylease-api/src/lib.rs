//! KEYLEASE API - REST Layer
//!
//! Axum service that leases slots on a small pool of rate-limited voice API
//! keys to interview sessions and accepts interview recordings as chunked
//! uploads. PostgreSQL holds all coordination state; handlers share nothing
//! in process beyond the store handle and immutable configuration.

#[macro_use]
mod macros;

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod extractors;
pub mod jobs;
pub mod openapi;
pub mod providers;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use config::{lease_policy_from_env, ApiConfig};
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{lease_sweep_task, LeaseSweepConfig};
pub use openapi::ApiDoc;
pub use providers::{DiscardChunkSink, HttpChunkSink, ProviderConfig, VoiceUsageClient};
pub use routes::create_api_router;
pub use state::{AppState, SharedStore};
pub use types::*;
