//! `/api/v1/admin/*` — key CRUD, audit query, agent purge. Gated on
//! `Auth-Path: /admin`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::audit::AuditEvent;
use crate::auth::ApiKeyRecord;
use crate::error::Result;
use crate::state::CoordinatorState;

use super::guard::{guard, require_admin};

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
    #[serde(default)]
    pub event: Option<String>,
}

fn default_audit_limit() -> usize {
    100
}

/// `GET /api/v1/admin/audit`
pub async fn audit(
    State(s): State<Arc<CoordinatorState>>,
    headers: axum::http::HeaderMap,
    Query(q): Query<AuditQuery>,
) -> Result<impl IntoResponse> {
    let ctx = guard(&s, &headers, "admin_audit", "admin", None).await?;
    require_admin(&s, "admin_audit", &ctx).await?;
    let filter = q.event.and_then(|name| serde_json::from_value(serde_json::Value::String(name)).ok());
    Ok(Json(s.audit.recent(q.limit, filter).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub agent_pattern: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    pub token: String,
    #[serde(flatten)]
    pub record: ApiKeyRecord,
}

/// `POST /api/v1/admin/keys`
pub async fn create_key(
    State(s): State<Arc<CoordinatorState>>,
    headers: axum::http::HeaderMap,
    Json(req): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse> {
    let ctx = guard(&s, &headers, "admin_keys", "admin", None).await?;
    require_admin(&s, "admin_keys", &ctx).await?;
    let (token, record) = s.auth.create_key(&req.agent_pattern, &req.description).await?;
    s.audit
        .record(AuditEvent::KeyCreated, serde_json::json!({ "key_id": record.key_id }))
        .await;
    Ok(Json(CreateKeyResponse { token, record }))
}

/// `GET /api/v1/admin/keys`
pub async fn list_keys(
    State(s): State<Arc<CoordinatorState>>,
    headers: axum::http::HeaderMap,
) -> Result<impl IntoResponse> {
    let ctx = guard(&s, &headers, "admin_keys", "admin", None).await?;
    require_admin(&s, "admin_keys", &ctx).await?;
    Ok(Json(s.auth.list_keys().await?))
}

#[derive(Debug, Serialize)]
pub struct RevokeKeyResponse {
    pub key_id: String,
    pub revoked: bool,
}

/// `DELETE /api/v1/admin/keys/{key_id}`
pub async fn revoke_key(
    State(s): State<Arc<CoordinatorState>>,
    headers: axum::http::HeaderMap,
    Path(key_id): Path<String>,
) -> Result<impl IntoResponse> {
    let ctx = guard(&s, &headers, "admin_keys", "admin", None).await?;
    require_admin(&s, "admin_keys", &ctx).await?;
    let revoked = s.auth.revoke_key(&key_id).await?;
    if revoked {
        s.audit.record(AuditEvent::KeyRevoked, serde_json::json!({ "key_id": key_id })).await;
    }
    Ok(Json(RevokeKeyResponse { key_id, revoked }))
}

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    pub pattern: String,
    #[serde(default)]
    pub cleanup_keys: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub matched: Vec<String>,
    pub dry_run: bool,
}

/// `POST /api/v1/admin/agents/purge`
pub async fn purge_agents(
    State(s): State<Arc<CoordinatorState>>,
    headers: axum::http::HeaderMap,
    Json(req): Json<PurgeRequest>,
) -> Result<impl IntoResponse> {
    let ctx = guard(&s, &headers, "admin_purge", "admin", None).await?;
    require_admin(&s, "admin_purge", &ctx).await?;
    let matched = s.registry.remove_by_pattern(&req.pattern, req.cleanup_keys, req.dry_run).await?;
    if !req.dry_run {
        s.audit
            .record(
                AuditEvent::AdminPurge,
                serde_json::json!({ "pattern": req.pattern, "count": matched.len() }),
            )
            .await;
    }
    Ok(Json(PurgeResponse { matched, dry_run: req.dry_run }))
}
