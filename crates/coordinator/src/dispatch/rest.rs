//! Supplementary REST surface for hook-style callers: health, register,
//! peek, unregister.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::audit::AuditEvent;
use crate::error::Result;
use crate::ids::canonical_id;
use crate::state::CoordinatorState;

use super::guard::guard;
use super::headers::extract_identity;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agents_online: usize,
}

/// `GET /api/health` — unauthenticated.
pub async fn health(State(s): State<Arc<CoordinatorState>>) -> impl IntoResponse {
    match s.registry.count_online().await {
        Ok(agents_online) => Json(HealthResponse { status: "ok", agents_online }).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct HookRegisterRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Option<indexmap::IndexSet<String>>,
}

/// `POST /api/v1/register` — hook-oriented register (same semantics as
/// `register_agent`).
pub async fn register(
    State(s): State<Arc<CoordinatorState>>,
    headers: HeaderMap,
    Json(req): Json<HookRegisterRequest>,
) -> Result<impl IntoResponse> {
    let identity = extract_identity(&headers)?;
    let requested_id = req.name.unwrap_or_else(|| identity.full_id());
    let caller_id = canonical_id(&identity.machine, identity.project.as_deref());

    guard(&s, &headers, "register_agent", &caller_id, None).await?;

    let agent = s
        .registry
        .register(&requested_id, identity.session_id.as_deref(), req.capabilities)
        .await?;
    s.audit
        .record(AuditEvent::AgentRegistered, serde_json::json!({ "agent_id": agent.id }))
        .await;
    Ok(Json(agent))
}

#[derive(Debug, Deserialize)]
pub struct PeekQuery {
    pub agent_id: String,
}

/// `GET /api/v1/peek` — hook-oriented peek (same semantics as
/// `peek_messages`).
pub async fn peek(
    State(s): State<Arc<CoordinatorState>>,
    headers: HeaderMap,
    Query(q): Query<PeekQuery>,
) -> Result<impl IntoResponse> {
    guard(&s, &headers, "peek_messages", &q.agent_id, Some(&q.agent_id)).await?;
    Ok(Json(s.inbox.peek(&q.agent_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UnregisterRequest {
    pub agent_id: String,
}

#[derive(Debug, Serialize)]
pub struct UnregisterResponse {
    pub agent_id: String,
    pub removed: bool,
}

/// `POST /api/v1/unregister`
pub async fn unregister(
    State(s): State<Arc<CoordinatorState>>,
    headers: HeaderMap,
    Json(req): Json<UnregisterRequest>,
) -> Result<impl IntoResponse> {
    guard(&s, &headers, "register_agent", &req.agent_id, Some(&req.agent_id)).await?;
    let removed = s.registry.remove(&req.agent_id).await?;
    if removed {
        s.audit
            .record(AuditEvent::AgentRemoved, serde_json::json!({ "agent_id": req.agent_id }))
            .await;
    }
    Ok(Json(UnregisterResponse { agent_id: req.agent_id, removed }))
}
