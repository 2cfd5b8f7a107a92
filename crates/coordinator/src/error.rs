//! Typed engine errors and their mapping to the wire error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error taxonomy shared by every engine component (spec.md §7).
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("coordinator store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store-side error reply (bad reply type, script error, …) rather
    /// than a connectivity failure — not retryable, indicates a bug or
    /// data corruption (spec_full.md §4.A).
    #[error("coordinator store protocol error: {0}")]
    StoreProtocol(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limited: retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("authentication failed")]
    AuthFailed,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("shutting down")]
    ShuttingDown,
}

impl CoordinatorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "COORDINATOR_UNAVAILABLE",
            Self::StoreProtocol(_) => "COORDINATOR_PROTOCOL_ERROR",
            Self::AgentNotFound(_) => "AGENT_NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::StoreUnavailable(_) => 503,
            Self::StoreProtocol(_) => 500,
            Self::AgentNotFound(_) => 404,
            Self::InvalidRequest(_) => 400,
            Self::RateLimited { .. } => 429,
            Self::AuthFailed => 401,
            Self::Forbidden(_) => 403,
            Self::ShuttingDown => 503,
        }
    }

    /// Build the wire envelope, attaching `suggestion` when one is cheap to
    /// compute at the conversion site (see `IntoResponse` below).
    pub fn to_error_body(&self, suggestion: Option<String>) -> ErrorBody {
        ErrorBody { code: self.code().to_owned(), message: self.to_string(), suggestion }
    }
}

/// Top-level error response envelope (spec.md §7: `{error, code, suggestion?}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let suggestion = match &self {
            Self::RateLimited { retry_after } => {
                Some(format!("retry after {retry_after}s"))
            }
            Self::AgentNotFound(_) => Some("check the id with list_agents".to_owned()),
            _ => None,
        };
        let body = ErrorResponse { error: self.to_error_body(suggestion) };
        (status, Json(body)).into_response()
    }
}
