//! Shared helpers for HTTP-level tests.
//!
//! Builds the full router over an in-memory store and drives it with
//! `tower::ServiceExt::oneshot`, so no socket or database is needed.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use keylease_api::{create_api_router, ApiConfig, AppState, SharedStore};
use keylease_core::{ChunkSink, LeasePolicy, UsageProvider};
use keylease_test_utils::{InMemoryStore, RecordingChunkSink};
use serde_json::Value;
use tower::ServiceExt;

/// Router plus handles to the collaborators behind it.
pub struct TestApp {
    pub router: Router,
    pub store: SharedStore,
    pub sink: Arc<RecordingChunkSink>,
}

impl TestApp {
    /// `keys` provisioned keys, default policy, no usage provider.
    pub fn with_keys(keys: usize) -> Self {
        Self::build(keys, LeasePolicy::default(), None)
    }

    pub fn build(
        keys: usize,
        policy: LeasePolicy,
        usage: Option<Arc<dyn UsageProvider>>,
    ) -> Self {
        let sink = Arc::new(RecordingChunkSink::new());
        let chunk_sink: Arc<dyn ChunkSink> = sink.clone();
        Self::assemble(keys, policy, usage, sink, chunk_sink)
    }

    /// Route chunk bytes to `chunk_sink` instead of the recording sink.
    pub fn with_chunk_sink(chunk_sink: Arc<dyn ChunkSink>) -> Self {
        let sink = Arc::new(RecordingChunkSink::new());
        Self::assemble(0, LeasePolicy::default(), None, sink, chunk_sink)
    }

    fn assemble(
        keys: usize,
        policy: LeasePolicy,
        usage: Option<Arc<dyn UsageProvider>>,
        sink: Arc<RecordingChunkSink>,
        chunk_sink: Arc<dyn ChunkSink>,
    ) -> Self {
        let memory = InMemoryStore::with_keys(keys, chrono::Utc::now())
            .unwrap_or_else(|e| panic!("in-memory store: {}", e));
        let store: SharedStore = Arc::new(memory);
        let state = AppState::new(store.clone(), policy, usage, chunk_sink);
        let router = create_api_router(state, &ApiConfig::default());
        Self {
            router,
            store,
            sink,
        }
    }

    /// Send a request and decode the JSON reply (`Value::Null` for an
    /// empty or non-JSON body).
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap_or_else(|e| panic!("request for {}: {}", uri, e));

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|e| panic!("router call for {}: {}", uri, e));
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    /// Send a raw, possibly malformed, JSON body.
    pub async fn post_raw(&self, uri: &str, raw: &'static str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(raw))
            .unwrap_or_else(|e| panic!("request for {}: {}", uri, e));
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|e| panic!("router call for {}: {}", uri, e));
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}
