//! Append-only structured event log with bounded retention.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Store;

const AUDIT_KEY: &str = "audit";
const MAX_ENTRIES: isize = 1_000;
const TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Every event kind the broker may record to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    AgentRegistered,
    AgentRemoved,
    MessageSent,
    MessageAcked,
    AuthFailure,
    AuthorizationDenied,
    RateLimited,
    KeyCreated,
    KeyRevoked,
    AdminPurge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event: AuditEvent,
    pub timestamp: u64,
    #[serde(flatten)]
    pub fields: serde_json::Value,
}

pub struct AuditLog {
    store: Store,
}

impl AuditLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record an event. Best-effort: failures are logged and swallowed —
    /// audit writes must never affect the caller's outcome.
    pub async fn record(&self, event: AuditEvent, fields: serde_json::Value) {
        let entry = AuditEntry {
            event,
            timestamp: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
            fields,
        };
        if let Err(e) = self.try_record(&entry).await {
            tracing::warn!(err = %e, ?event, "audit log write failed");
        }
    }

    async fn try_record(&self, entry: &AuditEntry) -> Result<()> {
        let raw = serde_json::to_string(entry)
            .map_err(|e| crate::error::CoordinatorError::InvalidRequest(e.to_string()))?;
        self.store.lpush(AUDIT_KEY, &raw).await?;
        self.store.ltrim(AUDIT_KEY, 0, MAX_ENTRIES - 1).await?;
        self.store.expire(AUDIT_KEY, TTL).await
    }

    /// Newest-first query, optionally filtered by event kind.
    pub async fn recent(&self, limit: usize, event_filter: Option<AuditEvent>) -> Result<Vec<AuditEntry>> {
        let raw = self.store.lrange(AUDIT_KEY, 0, MAX_ENTRIES - 1).await?;
        let mut out = Vec::new();
        for s in raw {
            let Ok(entry) = serde_json::from_str::<AuditEntry>(&s) else { continue };
            if let Some(filter) = event_filter {
                if entry.event != filter {
                    continue;
                }
            }
            out.push(entry);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}
