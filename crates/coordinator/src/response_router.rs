//! Matches reply messages to waiting senders, tolerating out-of-order
//! arrivals via put-back (spec.md §4.E).

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::inbox::{StoredMessage, MAX_WAIT};
use crate::store::Store;

fn replies_key(agent: &str) -> String {
    format!("replies:{agent}")
}

/// Outcome of a response wait: a matched reply, a plain timeout, or a
/// shutdown-triggered retry (spec.md §5: in-flight waits must wake within
/// ≤15s of shutdown rather than riding out their full client timeout).
#[derive(Debug, Clone)]
pub enum ResponseWait {
    Found(StoredMessage),
    Timeout,
    Retry,
}

pub struct ResponseRouter {
    store: Store,
}

impl ResponseRouter {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// wait_for_response() — loop until deadline: blocking-pop one entry,
    /// if it matches `request_id` return it, else put it back at the tail
    /// so other waiters still see FIFO order, and keep looping. Races every
    /// blocking-pop against `shutdown` so a mid-flight wait doesn't have to
    /// ride out its full client-requested timeout.
    pub async fn wait_for_response(
        &self,
        agent: &str,
        request_id: &str,
        timeout_secs: u64,
        shutdown: &CancellationToken,
    ) -> Result<ResponseWait> {
        if shutdown.is_cancelled() {
            return Ok(ResponseWait::Retry);
        }
        let deadline =
            Instant::now() + Duration::from_secs(timeout_secs.clamp(1, MAX_WAIT));
        let key = replies_key(agent);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ResponseWait::Timeout);
            }
            // store::blpop floors the wait to 1s; `remaining` is the
            // natural upper bound, so together they implement the
            // `[1, remaining]` clamp spec.md §4.E calls for.
            let popped = tokio::select! {
                res = self.store.blpop(&key, remaining) => res?,
                _ = shutdown.cancelled() => return Ok(ResponseWait::Retry),
            };
            let Some(raw) = popped else {
                // blpop either returned nothing (genuine timeout) or the
                // clamped wait elapsed before the deadline; loop again and
                // let the deadline check above decide.
                if Instant::now() >= deadline {
                    return Ok(ResponseWait::Timeout);
                }
                continue;
            };

            let Ok(reply) = serde_json::from_str::<StoredMessage>(&raw) else {
                continue;
            };

            if reply.reply_to.as_deref() == Some(request_id) {
                return Ok(ResponseWait::Found(reply));
            }

            // Not ours: put back at the tail, preserving FIFO for others.
            self.store.rpush(&key, &raw).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_clamp_never_exceeds_max_wait() {
        let timeout = 10_000u64.clamp(1, MAX_WAIT);
        assert_eq!(timeout, MAX_WAIT);
        let timeout = 0u64.clamp(1, MAX_WAIT);
        assert_eq!(timeout, 1);
    }
}
