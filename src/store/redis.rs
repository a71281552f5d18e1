//! Redis-backed counter store.
//!
//! Both write paths run as Lua scripts so Redis executes each of them as one
//! indivisible step. A counter can never be incremented without receiving an
//! expiry, and a sliding log count always reflects the caller's own insert.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{IntoConnectionInfo, Script};
use tracing::{debug, info, warn};

use super::{counter_key, log_key, CounterStore, LogHit, StoreError, WindowHit};
use crate::config::StoreConfig;

/// INCR, and PEXPIRE when the key was just created (or has somehow lost its
/// TTL). Returns `{count, ttl_millis}`.
const INCREMENT_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Prune entries scored at or before `now - window`, add this attempt, keep
/// the log alive for one more window. Returns `{size, oldest_score}`.
const RECORD_AND_COUNT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
redis.call('ZADD', KEYS[1], now, ARGV[3])
redis.call('PEXPIRE', KEYS[1], window)
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
return {redis.call('ZCARD', KEYS[1]), tonumber(oldest[2])}
"#;

/// Counter store talking to Redis (or a protocol-compatible server).
///
/// The connection manager is a single multiplexed connection that reconnects
/// on its own; cloning it per call is cheap and safe across tasks.
pub struct RedisCounterStore {
    connection: ConnectionManager,
    /// Distinguishes log entries written by this process from other writers.
    instance_id: String,
    sequence: AtomicU64,
    increment_script: Script,
    record_script: Script,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("instance_id", &self.instance_id)
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish()
    }
}

impl RedisCounterStore {
    /// Connect to the store described by `config` and verify it answers.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut connection_info = config.url.as_str().into_connection_info()?;
        if let Some(username) = &config.username {
            connection_info.redis.username = Some(username.clone());
        }
        if let Some(password) = &config.password {
            connection_info.redis.password = Some(password.clone());
        }

        info!(
            addr = ?connection_info.addr,
            db = connection_info.redis.db,
            authenticated = connection_info.redis.password.is_some(),
            "Connecting to counter store"
        );

        let client = redis::Client::open(connection_info)?;
        let connect_timeout = config.connect_timeout();
        let connection = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                warn!(timeout = ?connect_timeout, "Timed out connecting to counter store");
                StoreError::Timeout(connect_timeout)
            })??;

        let store = Self {
            connection,
            instance_id: uuid::Uuid::new_v4().simple().to_string(),
            sequence: AtomicU64::new(0),
            increment_script: Script::new(INCREMENT_WITH_EXPIRY),
            record_script: Script::new(RECORD_AND_COUNT),
        };
        store.ping().await?;

        info!(instance_id = %store.instance_id, "Counter store connected");
        Ok(store)
    }

    /// Identifier embedded in every log entry this store writes.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Close the store. Outstanding clones of the connection stay usable
    /// until they are dropped.
    pub async fn shutdown(self) {
        info!(
            instance_id = %self.instance_id,
            entries_written = self.sequence.load(Ordering::Relaxed),
            "Shutting down counter store"
        );
        drop(self.connection);
    }

    fn next_member(&self, now_millis: u64) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", now_millis, self.instance_id, seq)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowHit, StoreError> {
        let mut conn = self.connection.clone();
        let key = counter_key(key);
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);

        let mut invocation = self.increment_script.key(&key);
        invocation.arg(window_ms);
        let (count, ttl_ms): (i64, i64) = invocation.invoke_async(&mut conn).await?;

        debug!(key = %key, count, ttl_ms, "Incremented window counter");

        Ok(WindowHit {
            count: count.max(0) as u64,
            expires_in: (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms as u64)),
        })
    }

    async fn record_and_count_in_window(
        &self,
        key: &str,
        now_millis: u64,
        window_millis: u64,
    ) -> Result<LogHit, StoreError> {
        let mut conn = self.connection.clone();
        let key = log_key(key);
        let member = self.next_member(now_millis);

        let mut invocation = self.record_script.key(&key);
        invocation.arg(now_millis).arg(window_millis).arg(&member);
        // The entry just added guarantees the log is non-empty.
        let (count, oldest): (i64, i64) = invocation.invoke_async(&mut conn).await?;

        debug!(key = %key, member = %member, count, oldest, "Recorded sliding log entry");
        Ok(LogHit {
            count: count.max(0) as u64,
            oldest_millis: Some(oldest.max(0) as u64),
        })
    }

    async fn oldest_entry_timestamp(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection.clone();

        let oldest = redis::cmd("ZRANGE")
            .arg(log_key(key))
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async::<Vec<(String, f64)>>(&mut conn)
            .await?;

        Ok(oldest.first().map(|(_, score)| *score as u64))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(counter_key(key))
            .arg(log_key(key))
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
