//! Shared counter store.
//!
//! The store owns all rate limit state. Limiters never cache counts locally;
//! every admission check is a round trip to the store, and every operation
//! here executes atomically on the store side.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::InMemoryCounterStore;
pub use self::redis::RedisCounterStore;

/// Errors surfaced by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a fixed-window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Counter value after this increment.
    pub count: u64,
    /// Time until the counter expires, if the store reported one.
    pub expires_in: Option<Duration>,
}

/// Outcome of recording one attempt in a sliding log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHit {
    /// Entries left in the window, including this one.
    pub count: u64,
    /// Timestamp in milliseconds of the oldest surviving entry.
    pub oldest_millis: Option<u64>,
}

/// Store key of the fixed-window counter for a limiter key.
///
/// Each algorithm owns a distinct key so that checking one identity with
/// both never trips over the other's data type.
pub fn counter_key(key: &str) -> String {
    format!("{}:fixed", key)
}

/// Store key of the sliding log for a limiter key.
pub fn log_key(key: &str) -> String {
    format!("{}:log", key)
}

/// Operations a shared counter store must provide.
///
/// `key` is always the limiter key; stores map it to per-algorithm keys
/// with [`counter_key`] and [`log_key`].
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key`. When this increment creates the key,
    /// its expiry is set to `window` in the same atomic step.
    async fn increment_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowHit, StoreError>;

    /// Drop log entries at or before `now_millis - window_millis`, record a
    /// new entry at `now_millis`, and return the entry count including it
    /// together with the oldest surviving timestamp.
    async fn record_and_count_in_window(
        &self,
        key: &str,
        now_millis: u64,
        window_millis: u64,
    ) -> Result<LogHit, StoreError>;

    /// Timestamp in milliseconds of the oldest surviving log entry.
    async fn oldest_entry_timestamp(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Remove all state held for `key`, under both algorithms.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}
