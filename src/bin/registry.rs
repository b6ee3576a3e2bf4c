//! agentlink registry server binary.
//!
//! Serves the registry HTTP API and runs the health monitor that probes
//! registered agents and expires stale heartbeats.
//!
//! # Environment Variables
//!
//! - `AGENTLINK_CONFIG`: Optional YAML config file
//! - `AGENTLINK_BIND`: Listen address (default: 0.0.0.0:8500)
//! - `AGENTLINK_HEARTBEAT_TTL_SECONDS`: Heartbeat TTL (default: 30)
//! - `RUST_LOG`: Tracing filter (default: "info,agentlink=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin agentlink-registry
//! ```

use std::sync::Arc;

use anyhow::Context;
use agentlink::registry::{HealthMonitor, HttpHealthProbe, RegistryStore};
use agentlink::server::{app_router, AppState};
use agentlink::Config;

fn load_config() -> anyhow::Result<Config> {
    let mut config = match std::env::var("AGENTLINK_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,agentlink=debug".into()),
        )
        .init();

    let config = load_config()?;
    let registry = &config.registry;
    let bind_addr = registry.bind_addr()?;

    let store = Arc::new(RegistryStore::new(registry.heartbeat_ttl()));
    let monitor = HealthMonitor::new(
        store.clone(),
        Arc::new(HttpHealthProbe::new(registry.health_check_timeout())),
        registry.health_check_interval(),
    )
    .spawn();

    let app = app_router(AppState::new(store));

    tracing::info!("agentlink registry starting on {}", bind_addr);
    tracing::info!(
        "Heartbeat TTL {:?}, health checks every {:?}",
        registry.heartbeat_ttl(),
        registry.health_check_interval()
    );

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await
        .context("server failed")?;

    monitor.shutdown().await;
    Ok(())
}
