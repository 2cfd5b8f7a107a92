//! Shared coordinator state — the `Arc`-wrapped bundle every dispatch
//! handler is built over (spec.md §4.I).

use tokio_util::sync::CancellationToken;

use crate::audit::AuditLog;
use crate::auth::Auth;
use crate::config::CoordinatorConfig;
use crate::inbox::InboxEngine;
use crate::rate_limit::RateLimiter;
use crate::registry::Registry;
use crate::response_router::ResponseRouter;
use crate::store::Store;

pub struct CoordinatorState {
    pub config: CoordinatorConfig,
    pub registry: Registry,
    pub inbox: InboxEngine,
    pub response_router: ResponseRouter,
    pub auth: Auth,
    pub rate_limiter: RateLimiter,
    pub audit: AuditLog,
    pub shutdown: CancellationToken,
}

impl CoordinatorState {
    pub fn new(config: CoordinatorConfig, store: Store, shutdown: CancellationToken) -> Self {
        let auth_config = config.auth_config();
        Self {
            registry: Registry::new(store.clone()),
            inbox: InboxEngine::new(store.clone()),
            response_router: ResponseRouter::new(store.clone()),
            auth: Auth::new(store.clone(), auth_config),
            rate_limiter: RateLimiter::new(store.clone()),
            audit: AuditLog::new(store),
            config,
            shutdown,
        }
    }
}
