//! Per-agent wake-up signal. Advisory only: losing a token never loses a
//! message, because the inbox itself is authoritative.

use std::time::Duration;

use crate::error::Result;
use crate::store::Store;

/// Cap on the notify list length. Chosen to exceed `COMPACT_THRESHOLD` so
/// a send burst doesn't drop every token before a slow waiter drains.
pub const NOTIFY_CAP: isize = 16;

fn notify_key(agent: &str) -> String {
    format!("notify:{agent}")
}

pub struct NotifyChannel {
    store: Store,
}

impl NotifyChannel {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Push one wake token for `agent`, trimming the list to `NOTIFY_CAP`.
    pub async fn signal(&self, agent: &str) -> Result<()> {
        let key = notify_key(agent);
        self.store.lpush(&key, "1").await?;
        self.store.ltrim(&key, 0, NOTIFY_CAP - 1).await
    }

    /// Block up to `timeout` for a token. Returns `true` if one arrived.
    pub async fn wait(&self, agent: &str, timeout: Duration) -> Result<bool> {
        let key = notify_key(agent);
        Ok(self.store.blpop(&key, timeout).await?.is_some())
    }
}
