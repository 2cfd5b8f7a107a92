//! Shared harness for end-to-end acceptance tests: spins up a
//! `CoordinatorState` against a real store and wraps it in an
//! `axum_test::TestServer`.

use std::sync::Arc;

use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use coordinator::config::CoordinatorConfig;
use coordinator::dispatch::build_router;
use coordinator::state::CoordinatorState;
use coordinator::store::Store;

/// Connects to the store at `COORDINATOR_TEST_STORE_URL` (default
/// `redis://127.0.0.1:6379/15`, database 15 to stay clear of any real
/// deployment) and returns a fresh `TestServer` plus the shutdown token
/// used to drive the S6 graceful-shutdown scenario. Runs in dev mode (no
/// secrets configured), so every request is allowed — use `test_server_with_secrets`
/// for scenarios that need auth/authorization enforced (S5).
pub async fn test_server() -> anyhow::Result<(TestServer, CancellationToken)> {
    test_server_with_config(None, None, None).await
}

/// Same as `test_server`, but with `server_secret`/`admin_key`/`proxy_token`
/// configured so the auth and authorization paths are actually exercised
/// instead of short-circuited by dev mode.
pub async fn test_server_with_secrets(
    server_secret: &str,
    admin_key: &str,
) -> anyhow::Result<(TestServer, CancellationToken)> {
    test_server_with_config(Some(server_secret.to_owned()), Some(admin_key.to_owned()), None).await
}

async fn test_server_with_config(
    server_secret: Option<String>,
    admin_key: Option<String>,
    proxy_token: Option<String>,
) -> anyhow::Result<(TestServer, CancellationToken)> {
    let url = std::env::var("COORDINATOR_TEST_STORE_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_owned());
    let store = Store::connect(&url).await?;
    let shutdown = CancellationToken::new();

    let config = CoordinatorConfig {
        host: "127.0.0.1".into(),
        port: 0,
        store_url: url,
        server_secret,
        admin_key,
        proxy_token,
    };

    let state = Arc::new(CoordinatorState::new(config, store, shutdown.clone()));
    let router = build_router(state);
    Ok((TestServer::new(router)?, shutdown))
}
