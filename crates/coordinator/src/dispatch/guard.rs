//! The per-operation guard every dispatcher handler runs before invoking
//! the engine: authenticate, rate-limit, authorize.

use axum::http::HeaderMap;

use crate::audit::AuditEvent;
use crate::auth::{authorize, AuthResult, AuthSource};
use crate::error::{CoordinatorError, Result};
use crate::state::CoordinatorState;

use super::headers::{extract_auth_path, extract_bearer};

/// Outcome of a successful guard check: the authenticated identity to use
/// for rate-limiting and audit, plus the raw auth result for authorization.
pub struct GuardContext {
    pub auth: AuthResult,
    /// Identity used to key the rate limiter — the authenticated key id
    /// when present, otherwise the caller-supplied agent id.
    pub rate_identity: String,
}

/// Run authenticate -> rate-limit -> (optional) authorize, in that order.
/// `target_agent` is the agent id the operation would
/// affect, if any; when present and the auth source is `api_key`, it is
/// checked against the key's `agent_pattern`. Every rejection is mirrored
/// to the audit log before the error is returned to the caller.
pub async fn guard(
    state: &CoordinatorState,
    headers: &HeaderMap,
    operation: &str,
    caller_agent_id: &str,
    target_agent: Option<&str>,
) -> Result<GuardContext> {
    let path = extract_auth_path(headers);
    let token = extract_bearer(headers);
    let auth = match state.auth.authenticate(path, token.as_deref()).await {
        Ok(auth) => auth,
        Err(e) => {
            state
                .audit
                .record(AuditEvent::AuthFailure, serde_json::json!({ "operation": operation }))
                .await;
            return Err(e);
        }
    };

    let rate_identity = auth.key_id.clone().unwrap_or_else(|| caller_agent_id.to_owned());
    if let Err(e) = state.rate_limiter.record(operation, &rate_identity).await {
        state
            .audit
            .record(
                AuditEvent::RateLimited,
                serde_json::json!({ "operation": operation, "identity": rate_identity }),
            )
            .await;
        return Err(e);
    }

    if auth.source == AuthSource::ApiKey {
        if let (Some(pattern), Some(target)) = (&auth.agent_pattern, target_agent) {
            if let Err(e) = authorize(target, pattern) {
                state
                    .audit
                    .record(
                        AuditEvent::AuthorizationDenied,
                        serde_json::json!({ "operation": operation, "target": target, "pattern": pattern }),
                    )
                    .await;
                return Err(e);
            }
        }
    }

    Ok(GuardContext { auth, rate_identity })
}

/// Reject anything but an admin-authenticated caller (or dev mode, where
/// every request is allowed per spec.md §4.F). Every admin-only route must
/// call this after `guard()` — `guard()` itself only authenticates against
/// whatever `Auth-Path` the caller supplied and has no notion of which
/// routes are admin-only, so an ordinary agent key presented with
/// `Auth-Path: /agent` would otherwise sail straight through to an admin
/// operation (spec.md §4.F "Key management (admin only)").
pub async fn require_admin(state: &CoordinatorState, operation: &str, ctx: &GuardContext) -> Result<()> {
    if matches!(ctx.auth.source, AuthSource::Admin | AuthSource::NoAuth) {
        return Ok(());
    }
    state
        .audit
        .record(
            AuditEvent::AuthorizationDenied,
            serde_json::json!({ "operation": operation, "reason": "admin required" }),
        )
        .await;
    Err(CoordinatorError::Forbidden(format!("{operation} requires admin credentials")))
}
