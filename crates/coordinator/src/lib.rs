//! Coordinator: a multi-agent presence, messaging, and notification broker.

pub mod audit;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ids;
pub mod inbox;
pub mod notify;
pub mod rate_limit;
pub mod registry;
pub mod response_router;
pub mod state;
pub mod store;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorConfig;
use crate::state::CoordinatorState;
use crate::store::Store;

/// Run the coordinator broker until shutdown.
pub async fn run(config: CoordinatorConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    if config.auth_config().is_dev_mode() {
        tracing::warn!("no server_secret/admin_key/proxy_token configured — running in dev mode, every request is allowed");
    }

    let store = Store::connect(&config.store_url).await?;
    let state = Arc::new(CoordinatorState::new(config, store, shutdown.clone()));

    let router = dispatch::build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("coordinator listening on {addr}");

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
    Ok(())
}
