//! KEYLEASE API Server Entry Point
//!
//! Loads configuration, migrates the schema, provisions the key pool,
//! starts the lease sweep and serves HTTP until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use keylease_api::{
    constants::DEFAULT_API_PORT,
    create_api_router, lease_policy_from_env,
    services::ensure_pool,
    telemetry::{init_tracer, TelemetryConfig},
    ApiConfig, ApiError, ApiResult, AppState, DbClient, DbConfig, DiscardChunkSink,
    HttpChunkSink, LeaseSweepConfig, ProviderConfig, SharedStore, VoiceUsageClient,
};
use keylease_core::{ChunkSink, UsageProvider};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let policy = lease_policy_from_env().map_err(|e| {
        ApiError::invalid_input(format!("Invalid lease policy configuration: {}", e))
    })?;

    let db_config = DbConfig::from_env();
    let db = DbClient::from_config(&db_config)?;
    db.migrate().await?;
    let store: SharedStore = Arc::new(db);

    let providers = ProviderConfig::from_env();
    let key_indices = providers.key_indices();
    if key_indices.is_empty() {
        tracing::warn!("No voice API keys configured; allocations will fail until keys are added");
    }
    ensure_pool(store.as_ref(), &key_indices, Utc::now()).await?;

    let usage: Option<Arc<dyn UsageProvider>> = if key_indices.is_empty() {
        None
    } else {
        Some(Arc::new(VoiceUsageClient::new(&providers)?))
    };

    let sink: Arc<dyn ChunkSink> = match providers.upload_endpoint.as_deref() {
        Some(endpoint) => Arc::new(HttpChunkSink::new(endpoint, &providers)?),
        None => {
            tracing::warn!("KEYLEASE_UPLOAD_ENDPOINT not set; chunk bytes will be discarded");
            Arc::new(DiscardChunkSink)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = tokio::spawn(keylease_api::lease_sweep_task(
        store.clone(),
        policy,
        LeaseSweepConfig::from_env(),
        shutdown_rx,
    ));

    let api_config = ApiConfig::from_env();
    let state = AppState::new(store, policy, usage, sink);
    let app = create_api_router(state, &api_config);

    let addr = resolve_bind_addr()?;
    tracing::info!(
        %addr,
        service = %telemetry_config.service_name,
        environment = %telemetry_config.environment,
        capacity = policy.capacity,
        keys = key_indices.len(),
        "Starting KEYLEASE API server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweep.await {
        tracing::warn!(error = %e, "Lease sweep task ended abnormally");
    }

    Ok(())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("KEYLEASE_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("KEYLEASE_API_PORT").ok())
        .unwrap_or_else(|| DEFAULT_API_PORT.to_string());

    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
