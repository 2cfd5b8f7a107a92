//! `POST /rpc/{method}` — the primary ack-based message-passing surface.
//! One axum route, dispatched by method name, since the wire framing
//! itself is a black box and every method shares the same
//! guard → engine → audit pipeline.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::audit::AuditEvent;
use crate::error::{CoordinatorError, Result};
use crate::ids::canonical_id;
use crate::state::CoordinatorState;

use super::guard::guard;
use super::headers::extract_identity;

#[derive(Debug, Serialize)]
struct PingResponse {
    pong: bool,
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    capabilities: Option<IndexSet<String>>,
}

#[derive(Debug, Deserialize)]
struct SetDescriptionRequest {
    agent_id: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    to: String,
    message: String,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    blob_ref: Option<crate::inbox::BlobRef>,
}

#[derive(Debug, Deserialize)]
struct GetMessagesRequest {
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct AckMessagesRequest {
    agent_id: String,
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    message_id: String,
    response: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaitForMessageRequest {
    agent_id: String,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct WaitForResponseRequest {
    agent_id: String,
    message_id: String,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct FindAgentRequest {
    base_id: String,
}

#[derive(Debug, Serialize)]
struct FindAgentResponse {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<crate::registry::AgentView>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WaitForResponseResult {
    Message(crate::inbox::StoredMessage),
    Timeout,
    Retry { retry_after: u64 },
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &serde_json::Value) -> Result<T> {
    serde_json::from_value(body.clone())
        .map_err(|e| CoordinatorError::InvalidRequest(format!("malformed rpc body: {e}")))
}

/// `POST /rpc/{method}` — single entry point, matched by `method`.
pub async fn dispatch(
    State(s): State<Arc<CoordinatorState>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Option<Json<serde_json::Value>>,
) -> Result<axum::response::Response> {
    let body = body.map(|Json(v)| v).unwrap_or(serde_json::Value::Null);

    match method.as_str() {
        "ping" => Ok(Json(PingResponse { pong: true, timestamp: now_epoch() }).into_response()),
        "register_agent" => register_agent(s, headers, parse_body(&body)?).await,
        "set_description" => set_description(s, headers, parse_body(&body)?).await,
        "list_agents" => list_agents(s, headers).await,
        "find_agent" => find_agent(s, headers, parse_body(&body)?).await,
        "send_message" => send_message(s, headers, parse_body(&body)?).await,
        "get_messages" => get_messages(s, headers, parse_body(&body)?).await,
        "peek_messages" => peek_messages(s, headers, parse_body(&body)?).await,
        "ack_messages" => ack_messages(s, headers, parse_body(&body)?).await,
        "reply" => reply(s, headers, parse_body(&body)?).await,
        "wait_for_message" => wait_for_message(s, headers, parse_body(&body)?).await,
        "wait_for_response" => wait_for_response(s, headers, parse_body(&body)?).await,
        other => Err(CoordinatorError::InvalidRequest(format!("unknown rpc method: {other}"))),
    }
    .map(IntoResponse::into_response)
}

async fn register_agent(
    s: Arc<CoordinatorState>,
    headers: HeaderMap,
    req: RegisterRequest,
) -> Result<axum::response::Response> {
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
    Ok(Json(agent).into_response())
}

async fn set_description(
    s: Arc<CoordinatorState>,
    headers: HeaderMap,
    req: SetDescriptionRequest,
) -> Result<axum::response::Response> {
    guard(&s, &headers, "set_description", &req.agent_id, Some(&req.agent_id)).await?;
    let agent = s.registry.set_description(&req.agent_id, &req.description).await?;
    Ok(Json(agent).into_response())
}

async fn list_agents(s: Arc<CoordinatorState>, headers: HeaderMap) -> Result<axum::response::Response> {
    guard(&s, &headers, "list_agents", "anonymous", None).await?;
    Ok(Json(s.registry.list().await?).into_response())
}

async fn find_agent(
    s: Arc<CoordinatorState>,
    headers: HeaderMap,
    req: FindAgentRequest,
) -> Result<axum::response::Response> {
    guard(&s, &headers, "find_agent", "anonymous", None).await?;
    let agent = s.registry.find_by_base(&req.base_id).await?;
    Ok(Json(FindAgentResponse { found: agent.is_some(), agent }).into_response())
}

async fn send_message(
    s: Arc<CoordinatorState>,
    headers: HeaderMap,
    req: SendMessageRequest,
) -> Result<axum::response::Response> {
    let identity = extract_identity(&headers)?;
    let from = identity.full_id();

    guard(&s, &headers, "send_message", &from, Some(&req.to)).await?;

    let message =
        s.inbox.send(&from, &req.to, &req.message, req.context.as_deref(), req.blob_ref).await?;
    s.audit
        .record(
            AuditEvent::MessageSent,
            serde_json::json!({ "from": from, "to": req.to, "id": message.id }),
        )
        .await;
    Ok(Json(message).into_response())
}

async fn get_messages(
    s: Arc<CoordinatorState>,
    headers: HeaderMap,
    req: GetMessagesRequest,
) -> Result<axum::response::Response> {
    guard(&s, &headers, "get_messages", &req.agent_id, Some(&req.agent_id)).await?;
    Ok(Json(s.inbox.drain(&req.agent_id).await?).into_response())
}

async fn peek_messages(
    s: Arc<CoordinatorState>,
    headers: HeaderMap,
    req: GetMessagesRequest,
) -> Result<axum::response::Response> {
    guard(&s, &headers, "peek_messages", &req.agent_id, Some(&req.agent_id)).await?;
    Ok(Json(s.inbox.peek(&req.agent_id).await?).into_response())
}

async fn ack_messages(
    s: Arc<CoordinatorState>,
    headers: HeaderMap,
    req: AckMessagesRequest,
) -> Result<axum::response::Response> {
    guard(&s, &headers, "ack_messages", &req.agent_id, Some(&req.agent_id)).await?;
    let result = s.inbox.ack(&req.agent_id, &req.ids).await?;
    s.audit
        .record(
            AuditEvent::MessageAcked,
            serde_json::json!({ "agent_id": req.agent_id, "acked": result.acked }),
        )
        .await;
    Ok(Json(result).into_response())
}

async fn reply(
    s: Arc<CoordinatorState>,
    headers: HeaderMap,
    req: ReplyRequest,
) -> Result<axum::response::Response> {
    let identity = extract_identity(&headers)?;
    let from = identity.full_id();

    guard(&s, &headers, "reply", &from, None).await?;

    let reply = s.inbox.reply(&req.message_id, &from, &req.response, req.status.as_deref()).await?;
    Ok(Json(reply).into_response())
}

async fn wait_for_message(
    s: Arc<CoordinatorState>,
    headers: HeaderMap,
    req: WaitForMessageRequest,
) -> Result<axum::response::Response> {
    guard(&s, &headers, "wait_for_message", &req.agent_id, Some(&req.agent_id)).await?;
    let result = s.inbox.wait(&req.agent_id, req.timeout, &s.shutdown).await?;
    Ok(Json(result).into_response())
}

async fn wait_for_response(
    s: Arc<CoordinatorState>,
    headers: HeaderMap,
    req: WaitForResponseRequest,
) -> Result<axum::response::Response> {
    guard(&s, &headers, "wait_for_response", &req.agent_id, Some(&req.agent_id)).await?;
    let outcome = s
        .response_router
        .wait_for_response(&req.agent_id, &req.message_id, req.timeout, &s.shutdown)
        .await?;
    Ok(Json(match outcome {
        crate::response_router::ResponseWait::Found(msg) => WaitForResponseResult::Message(msg),
        crate::response_router::ResponseWait::Timeout => WaitForResponseResult::Timeout,
        crate::response_router::ResponseWait::Retry => {
            WaitForResponseResult::Retry { retry_after: 15 }
        }
    })
    .into_response())
}
