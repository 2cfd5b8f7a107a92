//! Per-agent FIFO inboxes with TTL filtering, ack sets, and lazy
//! compaction (spec.md §4.C).

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{CoordinatorError, Result};
use crate::ids::{is_valid_agent_id, message_fingerprint, parse_fingerprint};
use crate::notify::NotifyChannel;
use crate::store::Store;

/// Max size of `message` and `context` fields, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 50_000;
/// Storage ceiling for messages.
pub const MESSAGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Inbox length above which an ack triggers compaction.
pub const COMPACT_THRESHOLD: usize = 20;
/// Ceiling on any client-visible blocking wait, in seconds.
pub const MAX_WAIT: u64 = 3600;

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Message,
    Reply,
}

/// A reference to a payload stored out-of-band in the blob side-channel
/// (spec_full.md §3: `coordinator/blobs.py`'s put/get is out of scope per
/// spec.md §1, but a message still needs to *reference* a blob id). The
/// broker never reads or writes the blob itself — only this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRef {
    pub blob_id: String,
    pub size_bytes: u64,
}

/// `[a-f0-9]{32,64}` — lowercase hex digest, the shape the blob side-channel
/// uses for its ids.
pub fn is_valid_blob_id(id: &str) -> bool {
    (32..=64).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'a'..=b'f'))
}

/// A stored message, as it lives in an inbox or reply queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Opt-in alternative to inline `context` for oversize payloads
    /// shuttled through the blob side-channel; does not change the wire
    /// shape for ordinary sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<BlobRef>,
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A message as returned to a caller draining or peeking an inbox: the
/// stored record plus whether it has been acked. Acked entries are excluded
/// before this type is ever constructed (see `project_entries`), so `acked`
/// is always `false` on a value seen outside this module — kept on the wire
/// shape because spec.md §4.C names it as part of the returned record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    #[serde(flatten)]
    pub message: StoredMessage,
    pub acked: bool,
}

/// Result of `ack_messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResult {
    pub acked: usize,
    pub compacted: bool,
}

/// Result of `wait_for_message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WaitResult {
    Ready { pending: usize },
    Timeout,
    Retry { retry_after: u64 },
}

fn inbox_key(agent: &str) -> String {
    format!("inbox:{agent}")
}
fn replies_key(agent: &str) -> String {
    format!("replies:{agent}")
}
fn acked_key(agent: &str) -> String {
    format!("acked:{agent}")
}

fn validate_payload(label: &str, value: &str) -> Result<()> {
    if value.len() > MAX_PAYLOAD_BYTES {
        return Err(CoordinatorError::InvalidRequest(format!(
            "{label} exceeds {MAX_PAYLOAD_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Filter out entries older than `MESSAGE_TTL` and entries already in the
/// acked set, attaching the `acked` flag to what remains. Pure —
/// independently testable without a store (spec_full.md §4.C). spec.md §8
/// invariant 1: `drain(A)` returns exactly the messages whose ids are NOT in
/// the acked set, so an acked id must never resurface here regardless of
/// whether compaction has run yet.
pub fn project_entries(
    raw: &[StoredMessage],
    acked: &HashSet<String>,
    now: u64,
) -> Vec<InboxEntry> {
    raw.iter()
        .filter(|m| now.saturating_sub(m.timestamp) < MESSAGE_TTL.as_secs())
        .filter(|m| !acked.contains(&m.id))
        .map(|m| InboxEntry { message: m.clone(), acked: false })
        .collect()
}

/// Compaction algorithm (spec.md §4.C): keep entries not-acked and
/// not-expired, in order; return the kept list and the pruned acked set.
/// Pure — the write-back decision is left to the caller.
pub fn compact(
    raw: &[StoredMessage],
    acked: &HashSet<String>,
    now: u64,
) -> (Vec<StoredMessage>, HashSet<String>) {
    let kept: Vec<StoredMessage> = raw
        .iter()
        .filter(|m| {
            !acked.contains(&m.id) && now.saturating_sub(m.timestamp) < MESSAGE_TTL.as_secs()
        })
        .cloned()
        .collect();
    let kept_ids: HashSet<&str> = kept.iter().map(|m| m.id.as_str()).collect();
    let pruned_acked: HashSet<String> =
        acked.iter().filter(|id| kept_ids.contains(id.as_str())).cloned().collect();
    (kept, pruned_acked)
}

pub struct InboxEngine {
    store: Store,
    notify: NotifyChannel,
}

impl InboxEngine {
    pub fn new(store: Store) -> Self {
        let notify = NotifyChannel::new(store.clone());
        Self { store, notify }
    }

    async fn read_raw(&self, key: &str) -> Result<Vec<StoredMessage>> {
        let raw = self.store.lrange(key, 0, -1).await?;
        Ok(raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect())
    }

    async fn read_acked(&self, agent: &str) -> Result<HashSet<String>> {
        Ok(self.store.smembers(&acked_key(agent)).await?.into_iter().collect())
    }

    /// send() — append to the recipient's inbox, refresh its TTL, signal,
    /// and return the stored record.
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        body: &str,
        context: Option<&str>,
        blob_ref: Option<BlobRef>,
    ) -> Result<StoredMessage> {
        if !is_valid_agent_id(from) || !is_valid_agent_id(to) {
            return Err(CoordinatorError::InvalidRequest("invalid agent id".into()));
        }
        validate_payload("message", body)?;
        if let Some(ctx) = context {
            validate_payload("context", ctx)?;
        }
        if let Some(blob) = &blob_ref {
            if !is_valid_blob_id(&blob.blob_id) {
                return Err(CoordinatorError::InvalidRequest("invalid blob_id".into()));
            }
        }

        let message = StoredMessage {
            id: message_fingerprint(from, to),
            from_agent: from.to_owned(),
            to_agent: to.to_owned(),
            message: body.to_owned(),
            context: context.map(str::to_owned),
            blob_ref,
            timestamp: now_epoch(),
            kind: MessageKind::Message,
            reply_to: None,
            status: None,
        };

        let key = inbox_key(to);
        let raw = serde_json::to_string(&message)
            .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?;
        self.store.rpush(&key, &raw).await?;
        self.store.expire(&key, MESSAGE_TTL).await?;
        self.notify.signal(to).await?;
        Ok(message)
    }

    /// reply() — parse the fingerprint, push to the original sender's reply
    /// queue, and mirror a `type=reply` entry into their inbox too.
    pub async fn reply(
        &self,
        request_id: &str,
        from: &str,
        body: &str,
        status: Option<&str>,
    ) -> Result<StoredMessage> {
        let parsed = parse_fingerprint(request_id)
            .ok_or_else(|| CoordinatorError::InvalidRequest("invalid request_id".into()))?;
        validate_payload("response", body)?;

        let original_sender = parsed.from;
        let reply = StoredMessage {
            id: message_fingerprint(from, &original_sender),
            from_agent: from.to_owned(),
            to_agent: original_sender.clone(),
            message: body.to_owned(),
            context: None,
            blob_ref: None,
            timestamp: now_epoch(),
            kind: MessageKind::Reply,
            reply_to: Some(request_id.to_owned()),
            status: status.map(str::to_owned),
        };

        let raw = serde_json::to_string(&reply)
            .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?;

        let replies_key = replies_key(&original_sender);
        self.store.rpush(&replies_key, &raw).await?;
        self.store.expire(&replies_key, MESSAGE_TTL).await?;

        let inbox_key = inbox_key(&original_sender);
        self.store.rpush(&inbox_key, &raw).await?;
        self.store.expire(&inbox_key, MESSAGE_TTL).await?;

        self.notify.signal(&original_sender).await?;
        Ok(reply)
    }

    /// drain() — idempotent read, oldest-first, expired entries filtered.
    /// Does not physically remove anything.
    pub async fn drain(&self, agent: &str) -> Result<Vec<InboxEntry>> {
        let raw = self.read_raw(&inbox_key(agent)).await?;
        let acked = self.read_acked(agent).await?;
        Ok(project_entries(&raw, &acked, now_epoch()))
    }

    /// peek() — identical projection to drain(); kept as a distinct name
    /// because the RPC surface exposes both (spec.md §4.C: "same output
    /// today; drain never removes").
    pub async fn peek(&self, agent: &str) -> Result<Vec<InboxEntry>> {
        self.drain(agent).await
    }

    /// ack() — reject the whole batch on any malformed id; otherwise add to
    /// the acked set and opportunistically compact.
    pub async fn ack(&self, agent: &str, ids: &[String]) -> Result<AckResult> {
        for id in ids {
            if !crate::ids::is_valid_fingerprint(id) {
                return Err(CoordinatorError::InvalidRequest(format!(
                    "malformed message id: {id}"
                )));
            }
        }

        for id in ids {
            self.store.sadd(&acked_key(agent), id).await?;
        }

        let len = self.store.llen(&inbox_key(agent)).await?;
        let compacted = if len > COMPACT_THRESHOLD {
            self.compact_agent(agent).await?;
            true
        } else {
            false
        };

        Ok(AckResult { acked: ids.len(), compacted })
    }

    /// Run the compaction algorithm against live store state and write the
    /// kept list back if it differs.
    async fn compact_agent(&self, agent: &str) -> Result<()> {
        let key = inbox_key(agent);
        let raw = self.read_raw(&key).await?;
        let acked = self.read_acked(agent).await?;
        let now = now_epoch();
        let (kept, pruned_acked) = compact(&raw, &acked, now);

        if kept.len() != raw.len() {
            let mut pipeline = self.store.pipeline().delete(&key);
            for m in &kept {
                let raw = serde_json::to_string(m)
                    .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?;
                pipeline = pipeline.rpush(&key, &raw);
            }
            pipeline = pipeline.expire(&key, MESSAGE_TTL);
            pipeline.finish().await?;
        }

        // Acked set is never unconditionally deleted — only pruned, so a
        // concurrent reader never observes an empty acked set for a
        // non-empty kept list (spec.md §4.C step 5).
        let ack_key = acked_key(agent);
        for id in acked.difference(&pruned_acked) {
            self.store.srem(&ack_key, id).await?;
        }
        Ok(())
    }

    /// wait() — block on the notify channel up to `timeout` seconds,
    /// clamped to `[1, MAX_WAIT]`. Races the notify pop against `shutdown`
    /// so an in-flight wait wakes within ≤15s of shutdown instead of
    /// riding out the caller's full timeout (spec.md §5, S6).
    pub async fn wait(
        &self,
        agent: &str,
        timeout_secs: u64,
        shutdown: &CancellationToken,
    ) -> Result<WaitResult> {
        if shutdown.is_cancelled() {
            return Ok(WaitResult::Retry { retry_after: 15 });
        }
        let timeout = Duration::from_secs(timeout_secs.clamp(1, MAX_WAIT));
        let arrived = tokio::select! {
            res = self.notify.wait(agent, timeout) => res?,
            _ = shutdown.cancelled() => return Ok(WaitResult::Retry { retry_after: 15 }),
        };
        if arrived {
            let pending = self.pending_count(agent).await?;
            Ok(WaitResult::Ready { pending })
        } else {
            Ok(WaitResult::Timeout)
        }
    }

    /// pending_count() — raw list length, expired entries not filtered
    /// (cheap by design).
    pub async fn pending_count(&self, agent: &str) -> Result<usize> {
        self.store.llen(&inbox_key(agent)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, timestamp: u64) -> StoredMessage {
        StoredMessage {
            id: id.to_owned(),
            from_agent: "a".into(),
            to_agent: "b".into(),
            message: "hi".into(),
            context: None,
            blob_ref: None,
            timestamp,
            kind: MessageKind::Message,
            reply_to: None,
            status: None,
        }
    }

    #[test]
    fn blob_id_grammar() {
        assert!(is_valid_blob_id(&"a".repeat(32)));
        assert!(is_valid_blob_id(&"0123456789abcdef".repeat(2)));
        assert!(!is_valid_blob_id(&"a".repeat(31))); // too short
        assert!(!is_valid_blob_id(&"a".repeat(65))); // too long
        assert!(!is_valid_blob_id(&"A".repeat(32))); // uppercase not allowed
        assert!(!is_valid_blob_id(&"g".repeat(32))); // not hex
    }

    #[test]
    fn project_filters_expired_and_excludes_acked() {
        let now = 1_000_000;
        let raw = vec![
            msg("a::b::00000001", now - 10),
            msg("a::b::00000002", now - MESSAGE_TTL.as_secs() - 1),
            msg("a::b::00000003", now - 10),
        ];
        let mut acked = HashSet::new();
        acked.insert("a::b::00000001".to_owned());

        // 00000001 is acked -> excluded, 00000002 is expired -> excluded,
        // only 00000003 (unacked, unexpired) survives (spec.md §8 invariant 1).
        let entries = project_entries(&raw, &acked, now);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message.id, "a::b::00000003");
        assert!(!entries[0].acked);
    }

    #[test]
    fn compact_drops_acked_and_expired_keeps_order() {
        let now = 1_000_000;
        let raw = vec![
            msg("a::b::00000001", now - 1),
            msg("a::b::00000002", now - 1),
            msg("a::b::00000003", now - 1),
        ];
        let mut acked = HashSet::new();
        acked.insert("a::b::00000001".to_owned());
        acked.insert("a::b::deadbeef".to_owned()); // not in kept list -> pruned

        let (kept, pruned_acked) = compact(&raw, &acked, now);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].id, "a::b::00000002");
        assert_eq!(kept[1].id, "a::b::00000003");
        // a::b::00000001 was acked but removed from inbox -> pruned from acked set too
        assert!(pruned_acked.is_empty());
    }

    #[test]
    fn compact_acked_set_bounded_by_inbox_size() {
        let now = 1_000_000;
        let raw = vec![msg("a::b::00000001", now - 1), msg("a::b::00000002", now - 1)];
        let mut acked = HashSet::new();
        acked.insert("a::b::00000002".to_owned());

        let (kept, pruned_acked) = compact(&raw, &acked, now);
        assert_eq!(kept.len(), 1);
        assert!(pruned_acked.is_empty());
        assert!(acked.len() >= pruned_acked.len());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const NOW: u64 = 10_000_000;

    /// Arbitrary (non-expired) stored message with a distinct id, in
    /// insertion order by construction.
    fn message_seq(len: usize) -> Vec<StoredMessage> {
        (0..len)
            .map(|i| StoredMessage {
                id: format!("a::b::{i:08x}"),
                from_agent: "a".into(),
                to_agent: "b".into(),
                message: "hi".into(),
                context: None,
                blob_ref: None,
                timestamp: NOW - 1,
                kind: MessageKind::Message,
                reply_to: None,
                status: None,
            })
            .collect()
    }

    proptest! {
        /// spec.md §8 property 1: drain() returns exactly the messages
        /// whose ids are not in the acked set, in insertion order.
        #[test]
        fn drain_returns_unacked_in_order(len in 0usize..40, ack_mask in proptest::collection::vec(any::<bool>(), 0..40)) {
            let raw = message_seq(len);
            let acked: HashSet<String> = raw
                .iter()
                .zip(ack_mask.iter().cycle())
                .filter(|(_, &acked)| acked)
                .map(|(m, _)| m.id.clone())
                .collect();

            let entries = project_entries(&raw, &acked, NOW);

            // Exactly the unacked subset survives, in original order, and
            // none of the survivors are flagged acked (they couldn't be).
            let expected_ids: Vec<&str> =
                raw.iter().filter(|m| !acked.contains(&m.id)).map(|m| m.id.as_str()).collect();
            let entry_ids: Vec<&str> = entries.iter().map(|e| e.message.id.as_str()).collect();
            prop_assert_eq!(entry_ids, expected_ids);
            for entry in &entries {
                prop_assert!(!entry.acked);
            }
        }

        /// spec.md §8 property 3: after compaction, |acked| <= |kept|, and
        /// no id that was pruned from the inbox resurfaces in the acked set.
        #[test]
        fn compact_bounds_acked_set_and_preserves_order(
            len in 0usize..40,
            ack_mask in proptest::collection::vec(any::<bool>(), 0..40),
        ) {
            let raw = message_seq(len);
            let acked: HashSet<String> = raw
                .iter()
                .zip(ack_mask.iter().cycle())
                .filter(|(_, &acked)| acked)
                .map(|(m, _)| m.id.clone())
                .collect();

            let (kept, pruned_acked) = compact(&raw, &acked, NOW);

            // Kept is exactly the unacked subset, in original order.
            let expected_kept: Vec<&str> =
                raw.iter().filter(|m| !acked.contains(&m.id)).map(|m| m.id.as_str()).collect();
            let kept_ids: Vec<&str> = kept.iter().map(|m| m.id.as_str()).collect();
            prop_assert_eq!(kept_ids, expected_kept);

            // The acked set shrinks to at most the kept list's size, and
            // every acked id removed from the inbox is also removed here.
            prop_assert!(pruned_acked.len() <= kept.len());
            for id in &pruned_acked {
                prop_assert!(kept.iter().any(|m| &m.id == id));
            }
        }
    }
}
