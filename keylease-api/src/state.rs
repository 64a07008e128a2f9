//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use keylease_core::{ChunkSink, LeasePolicy, UsageProvider};
use keylease_storage::Store;

/// Store handle shared by every route.
pub type SharedStore = Arc<dyn Store>;

/// Application-wide state shared across all routes.
///
/// Everything here is either immutable configuration or a handle to an
/// external collaborator; coordination between requests happens in the store.
#[derive(Clone)]
pub struct AppState {
    /// Lease and chunk persistence (PostgreSQL in production).
    pub store: SharedStore,
    pub policy: LeasePolicy,
    /// Voice provider usage lookups. `None` disables credit refresh.
    pub usage: Option<Arc<dyn UsageProvider>>,
    /// Destination for uploaded chunk bytes.
    pub sink: Arc<dyn ChunkSink>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        store: SharedStore,
        policy: LeasePolicy,
        usage: Option<Arc<dyn UsageProvider>>,
        sink: Arc<dyn ChunkSink>,
    ) -> Self {
        Self {
            store,
            policy,
            usage,
            sink,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(SharedStore, store);
crate::impl_from_ref!(LeasePolicy, policy);
crate::impl_from_ref!(Arc<dyn ChunkSink>, sink);
crate::impl_from_ref!(Instant, start_time);
