//! Identity and auth-path extraction from request headers.

use axum::http::HeaderMap;

use crate::auth::AuthPath;
use crate::error::{CoordinatorError, Result};
use crate::ids::canonical_id;

/// Resolved caller identity before presence-registry collision resolution.
pub struct Identity {
    pub machine: String,
    pub project: Option<String>,
    pub session_id: Option<String>,
}

impl Identity {
    pub fn full_id(&self) -> String {
        canonical_id(&self.machine, self.project.as_deref())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn extract_identity(headers: &HeaderMap) -> Result<Identity> {
    let machine = header_str(headers, "Machine-Name")
        .ok_or_else(|| CoordinatorError::InvalidRequest("missing Machine-Name header".into()))?
        .to_owned();
    let project = header_str(headers, "Project-Name").map(str::to_owned);
    let session_id = header_str(headers, "Session-ID").map(str::to_owned);
    Ok(Identity { machine, project, session_id })
}

pub fn extract_auth_path(headers: &HeaderMap) -> AuthPath {
    AuthPath::from_header(header_str(headers, "Auth-Path"))
}

/// Parse `Authorization: Bearer <token>`, if present.
pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "authorization")?.strip_prefix("Bearer ").map(str::to_owned)
}
