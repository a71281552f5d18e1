//! In-process counter store.
//!
//! Mirrors the Redis semantics and key layout for single-instance
//! deployments and tests. Each key is guarded by its map shard lock, so every
//! operation is atomic with respect to other operations on the same key.
//! Expired state is dropped by [`InMemoryCounterStore::purge_expired`],
//! usually driven by [`InMemoryCounterStore::spawn_cleanup`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{counter_key, log_key, CounterStore, LogHit, StoreError, WindowHit};
use crate::clock::{Clock, SystemClock};

#[derive(Debug)]
struct WindowCounter {
    count: u64,
    expires_at: u64,
}

#[derive(Debug, Default)]
struct SlidingLog {
    /// (timestamp millis, sequence) pairs, ordered by time.
    entries: BTreeSet<(u64, u64)>,
    expires_at: u64,
}

/// Counter store held entirely in process memory.
pub struct InMemoryCounterStore {
    clock: Arc<dyn Clock>,
    counters: DashMap<String, WindowCounter>,
    logs: DashMap<String, SlidingLog>,
    sequence: AtomicU64,
}

impl InMemoryCounterStore {
    /// Create a store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that expires keys according to `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: DashMap::new(),
            logs: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Drop every expired counter and log.
    pub fn purge_expired(&self) {
        let now = self.clock.now_millis();
        self.counters.retain(|_, counter| counter.expires_at > now);
        self.logs.retain(|_, log| log.expires_at > now);
        debug!(
            counters = self.counters.len(),
            logs = self.logs.len(),
            "Purged expired rate limit state"
        );
    }

    /// Purge expired state every `period` in a background task.
    ///
    /// The task holds only a weak reference and ends once the store is
    /// dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match store.upgrade() {
                    Some(store) => store.purge_expired(),
                    None => break,
                }
            }
            debug!("Counter store cleanup stopped");
        })
    }

    /// Number of live keys across both algorithms.
    pub fn key_count(&self) -> usize {
        let now = self.clock.now_millis();
        let counters = self.counters.iter().filter(|c| c.expires_at > now).count();
        let logs = self.logs.iter().filter(|l| l.expires_at > now).count();
        counters + logs
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowHit, StoreError> {
        let now = self.clock.now_millis();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);

        let mut counter = self
            .counters
            .entry(counter_key(key))
            .or_insert(WindowCounter {
                count: 0,
                expires_at: 0,
            });

        if counter.expires_at <= now {
            counter.count = 0;
            counter.expires_at = now.saturating_add(window_ms);
        }
        counter.count += 1;

        Ok(WindowHit {
            count: counter.count,
            expires_in: Some(Duration::from_millis(counter.expires_at - now)),
        })
    }

    async fn record_and_count_in_window(
        &self,
        key: &str,
        now_millis: u64,
        window_millis: u64,
    ) -> Result<LogHit, StoreError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut log = self.logs.entry(log_key(key)).or_default();

        if let Some(cutoff) = now_millis.checked_sub(window_millis) {
            let live = log.entries.split_off(&(cutoff + 1, 0));
            log.entries = live;
        }
        log.entries.insert((now_millis, seq));
        log.expires_at = now_millis.saturating_add(window_millis);

        Ok(LogHit {
            count: log.entries.len() as u64,
            oldest_millis: log.entries.first().map(|(ts, _)| *ts),
        })
    }

    async fn oldest_entry_timestamp(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self
            .logs
            .get(&log_key(key))
            .and_then(|log| log.entries.first().map(|(ts, _)| *ts)))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.counters.remove(&counter_key(key));
        self.logs.remove(&log_key(key));
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
