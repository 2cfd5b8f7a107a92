//! HTTP dispatcher: RPC surface, supplementary REST, and admin routes.

pub mod admin;
pub mod guard;
pub mod headers;
pub mod rest;
pub mod rpc;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::CoordinatorState;

/// Build the axum `Router` with every route the broker exposes.
pub fn build_router(state: Arc<CoordinatorState>) -> Router {
    Router::new()
        .route("/api/health", get(rest::health))
        .route("/api/v1/register", post(rest::register))
        .route("/api/v1/peek", get(rest::peek))
        .route("/api/v1/unregister", post(rest::unregister))
        .route("/api/v1/admin/audit", get(admin::audit))
        .route("/api/v1/admin/keys", post(admin::create_key).get(admin::list_keys))
        .route("/api/v1/admin/keys/{key_id}", delete(admin::revoke_key))
        .route("/api/v1/admin/agents/purge", post(admin::purge_agents))
        .route("/rpc/{method}", post(rpc::dispatch))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
