//! Sliding-window per-operation, per-identity request accounting
//! (spec.md §4.G).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{CoordinatorError, Result};
use crate::store::Store;

/// `(max requests, window)` for a given operation class.
struct Limit {
    max: usize,
    window: Duration,
}

const DEFAULT_LIMIT: Limit = Limit { max: 60, window: Duration::from_secs(60) };

/// Per-operation table (spec_full.md §4.G, generalized from
/// `coordinator/messaging.py`'s `RATE_LIMIT_REQUESTS`/`_WINDOW_SECONDS`).
fn limit_for(operation: &str) -> Limit {
    match operation {
        "send_message" | "reply" => Limit { max: 10, window: Duration::from_secs(60) },
        "register_agent" | "set_description" => Limit { max: 20, window: Duration::from_secs(60) },
        "get_messages" | "peek_messages" | "wait_for_message" | "wait_for_response" => {
            Limit { max: 60, window: Duration::from_secs(60) }
        }
        "ack_messages" => Limit { max: 30, window: Duration::from_secs(60) },
        op if op.starts_with("admin_") => Limit { max: 30, window: Duration::from_secs(60) },
        _ => DEFAULT_LIMIT,
    }
}

fn now_millis() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64() * 1000.0
}

fn bucket_key(operation: &str, identity: &str) -> String {
    format!("rate:{operation}:{identity}")
}

pub struct RateLimiter {
    store: Store,
}

impl RateLimiter {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Trim expired entries, count what remains, and — unless `check_only`
    /// — insert `now` if under the limit. Returns `Ok(remaining_budget)` or
    /// `Err(RateLimited)`.
    async fn check(&self, operation: &str, identity: &str, check_only: bool) -> Result<usize> {
        let limit = limit_for(operation);
        let key = bucket_key(operation, identity);
        let now = now_millis();
        let window_start = now - limit.window.as_secs_f64() * 1000.0;

        self.store.zremrangebyscore(&key, 0.0, window_start).await?;
        let count = self.store.zcard(&key).await?;

        if count >= limit.max {
            return Err(CoordinatorError::RateLimited { retry_after: limit.window.as_secs() });
        }

        if !check_only {
            self.store.zadd(&key, &now.to_string(), now).await?;
            self.store.expire(&key, limit.window * 2).await?;
        }

        Ok(limit.max - count)
    }

    /// check-and-record: the normal admission path.
    pub async fn record(&self, operation: &str, identity: &str) -> Result<()> {
        self.check(operation, identity, false).await.map(|_| ())
    }

    /// check_only: read without inserting.
    pub async fn check_only(&self, operation: &str, identity: &str) -> Result<()> {
        self.check(operation, identity, true).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_operations_have_specific_limits() {
        assert_eq!(limit_for("send_message").max, 10);
        assert_eq!(limit_for("get_messages").max, 60);
        assert_eq!(limit_for("admin_purge").max, 30);
    }

    #[test]
    fn unknown_operation_gets_generous_default() {
        let l = limit_for("some_future_op");
        assert_eq!(l.max, 60);
        assert_eq!(l.window, Duration::from_secs(60));
    }
}
