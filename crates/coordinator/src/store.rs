//! Typed wrapper over the external key/value store (spec.md §4.A).
//!
//! Everything the rest of the engine needs from Redis goes through this
//! module: hashes, lists with blocking pop, sorted sets, and per-key TTL.
//! Single-key operations are atomic because Redis guarantees it; multi-key
//! updates that must be observed atomically are issued as one pipeline.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{CoordinatorError, Result};

/// Thin handle over a `ConnectionManager`. Cheap to clone — every clone
/// shares the same underlying multiplexed connection.
#[derive(Clone)]
pub struct Store {
    conn: ConnectionManager,
}

/// Distinguish connectivity failures (retryable) from store-side error
/// replies (not retryable — a bug or data corruption), per spec_full.md
/// §4.A.
fn store_err(e: redis::RedisError) -> CoordinatorError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        CoordinatorError::StoreUnavailable(e.to_string())
    } else {
        CoordinatorError::StoreProtocol(e.to_string())
    }
}

impl Store {
    /// Connect and probe the store with a round-trip `PING` before returning.
    /// Called once at startup; the caller should treat a failure here as
    /// fatal (spec.md §4.A: "startup must probe the store").
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let mut conn = ConnectionManager::new(client).await.map_err(store_err)?;
        redis::cmd("PING").query_async::<String>(&mut conn).await.map_err(store_err)?;
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    // -- Hash ------------------------------------------------------------

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.conn().hget(key, field).await.map_err(store_err)
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let _: () = self.conn().hset(key, field, value).await.map_err(store_err)?;
        Ok(())
    }

    pub async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let removed: i64 = self.conn().hdel(key, field).await.map_err(store_err)?;
        Ok(removed > 0)
    }

    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        let map: std::collections::HashMap<String, String> =
            self.conn().hgetall(key).await.map_err(store_err)?;
        Ok(map.into_iter().collect())
    }

    // -- List --------------------------------------------------------------

    pub async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let _: () = self.conn().rpush(key, value).await.map_err(store_err)?;
        Ok(())
    }

    pub async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let _: () = self.conn().lpush(key, value).await.map_err(store_err)?;
        Ok(())
    }

    pub async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.conn().lrange(key, start, stop).await.map_err(store_err)
    }

    pub async fn llen(&self, key: &str) -> Result<usize> {
        self.conn().llen(key).await.map_err(store_err)
    }

    pub async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let _: () = self.conn().ltrim(key, start, stop).await.map_err(store_err)?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let _: () = self.conn().del(key).await.map_err(store_err)?;
        Ok(())
    }

    /// Blocking pop from the head of `key`, waiting up to `timeout` (floor
    /// 1s, per spec.md §4.A "blocking wait ≥ 1s"). Returns `None` on
    /// timeout. This is the engine's only blocking primitive: no in-process
    /// condition variable is used anywhere (spec.md §9).
    pub async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let timeout = timeout.max(Duration::from_secs(1));
        let reply: Option<(String, String)> =
            self.conn().blpop(key, timeout.as_secs_f64()).await.map_err(store_err)?;
        Ok(reply.map(|(_, value)| value))
    }

    // -- Sorted set ----------------------------------------------------------

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let _: () = self.conn().zadd(key, member, score).await.map_err(store_err)?;
        Ok(())
    }

    pub async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<()> {
        let _: () = self.conn().zrembyscore(key, min, max).await.map_err(store_err)?;
        Ok(())
    }

    pub async fn zcard(&self, key: &str) -> Result<usize> {
        self.conn().zcard(key).await.map_err(store_err)
    }

    // -- Set -----------------------------------------------------------------

    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let _: () = self.conn().sadd(key, member).await.map_err(store_err)?;
        Ok(())
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.conn().sismember(key, member).await.map_err(store_err)
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.conn().smembers(key).await.map_err(store_err)
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let _: () = self.conn().srem(key, member).await.map_err(store_err)?;
        Ok(())
    }

    // -- TTL -----------------------------------------------------------------

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let _: () = self.conn().expire(key, ttl.as_secs() as i64).await.map_err(store_err)?;
        Ok(())
    }

    /// Start a pipelined group of operations. Pipeline execution is the
    /// adapter's only multi-key atomicity primitive (spec.md §5): callers
    /// build up a sequence of intents and `finish` them in one round-trip.
    pub fn pipeline(&self) -> PipelineBuilder {
        let mut pipe = redis::pipe();
        pipe.atomic();
        PipelineBuilder { pipe, store: self.clone() }
    }
}

/// Builder for a pipelined group of store operations, executed atomically
/// from the perspective of any single key involved.
pub struct PipelineBuilder {
    pipe: redis::Pipeline,
    store: Store,
}

impl PipelineBuilder {
    pub fn delete(mut self, key: &str) -> Self {
        self.pipe.del(key).ignore();
        self
    }

    pub fn rpush(mut self, key: &str, value: &str) -> Self {
        self.pipe.rpush(key, value).ignore();
        self
    }

    pub fn srem(mut self, key: &str, member: &str) -> Self {
        self.pipe.srem(key, member).ignore();
        self
    }

    pub fn expire(mut self, key: &str, ttl: Duration) -> Self {
        self.pipe.expire(key, ttl.as_secs() as i64).ignore();
        self
    }

    pub fn hdel(mut self, key: &str, field: &str) -> Self {
        self.pipe.hdel(key, field).ignore();
        self
    }

    /// Execute the pipeline atomically.
    pub async fn finish(self) -> Result<()> {
        let mut conn = self.store.conn();
        self.pipe.query_async::<()>(&mut conn).await.map_err(store_err)
    }
}
