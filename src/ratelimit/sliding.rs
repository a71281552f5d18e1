//! Sliding-window log limiter.
//!
//! Every attempt is logged with its timestamp, admitted or not, and only
//! entries within the last window are counted. A burst of rejected requests
//! therefore keeps the identity throttled instead of earning a free retry a
//! moment later.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::backend::{AdmissionAlgorithm, Algorithm};
use super::key::LimiterKey;
use super::result::RateLimitResult;
use crate::clock::{millis_to_secs_ceil, Clock};
use crate::store::{CounterStore, StoreError};

/// Timestamp-log admission.
pub struct SlidingWindowLimiter<S: CounterStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: CounterStore> SlidingWindowLimiter<S> {
    /// Create a limiter over `store`.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl<S: CounterStore> AdmissionAlgorithm for SlidingWindowLimiter<S> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }

    async fn check(
        &self,
        key: &LimiterKey,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitResult, StoreError> {
        let now = self.clock.now_millis();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);

        let hit = self
            .store
            .record_and_count_in_window(key.as_str(), now, window_ms)
            .await?;
        let count = hit.count;
        let oldest = hit.oldest_millis.unwrap_or(now);
        let reset_at = millis_to_secs_ceil(oldest.saturating_add(window_ms));

        trace!(
            key = %key,
            count,
            limit,
            oldest,
            reset_at,
            "Sliding window check"
        );

        Ok(RateLimitResult {
            allowed: count <= limit,
            remaining: limit.saturating_sub(count),
            reset_at,
            total_hits: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::key::KeyBuilder;
    use crate::store::{InMemoryCounterStore, LogHit, WindowHit};

    const START: u64 = 1_700_000_000_000;

    fn limiter() -> (Arc<ManualClock>, SlidingWindowLimiter<InMemoryCounterStore>) {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        (clock.clone(), SlidingWindowLimiter::new(store, clock))
    }

    #[tokio::test]
    async fn test_sixth_request_rejected() {
        let (_clock, limiter) = limiter();
        let key = KeyBuilder::new("t").build("ip:1.2.3.4").unwrap();
        let window = Duration::from_secs(60);

        for i in 1..=5u64 {
            let result = limiter.check(&key, 5, window).await.unwrap();
            assert!(result.allowed, "request {} should be admitted", i);
            assert_eq!(result.remaining, 5 - i);
        }

        let result = limiter.check(&key, 5, window).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.total_hits, 6);
        assert_eq!(result.reset_at, (START / 1000) as i64 + 60);
    }

    #[tokio::test]
    async fn test_rejected_attempts_keep_counting() {
        let (clock, limiter) = limiter();
        let key = KeyBuilder::new("t").build("k").unwrap();
        let window = Duration::from_secs(10);

        for _ in 0..2 {
            assert!(limiter.check(&key, 2, window).await.unwrap().allowed);
        }
        clock.advance(Duration::from_secs(1));
        for _ in 0..3 {
            assert!(!limiter.check(&key, 2, window).await.unwrap().allowed);
        }

        // The admitted entries have aged out, the rejected ones have not
        clock.advance(Duration::from_secs(9));
        let result = limiter.check(&key, 2, window).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.total_hits, 4);
        assert_eq!(result.reset_at, (START / 1000) as i64 + 11);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (clock, limiter) = limiter();
        let key = KeyBuilder::new("t").build("k").unwrap();
        let window = Duration::from_secs(10);

        limiter.check(&key, 2, window).await.unwrap();
        clock.advance(Duration::from_secs(5));
        limiter.check(&key, 2, window).await.unwrap();

        clock.advance(Duration::from_secs(5));
        let result = limiter.check(&key, 2, window).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.total_hits, 2);
        // Oldest surviving entry is the one from t+5s
        assert_eq!(result.reset_at, (START / 1000) as i64 + 15);
    }

    /// Serves the sliding log from memory but refuses standalone lookups.
    struct RecordOnlyStore(InMemoryCounterStore);

    #[async_trait]
    impl CounterStore for RecordOnlyStore {
        async fn increment_with_expiry(
            &self,
            key: &str,
            window: Duration,
        ) -> Result<WindowHit, StoreError> {
            self.0.increment_with_expiry(key, window).await
        }

        async fn record_and_count_in_window(
            &self,
            key: &str,
            now_millis: u64,
            window_millis: u64,
        ) -> Result<LogHit, StoreError> {
            self.0
                .record_and_count_in_window(key, now_millis, window_millis)
                .await
        }

        async fn oldest_entry_timestamp(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("unexpected round trip".to_string()))
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_check_is_one_store_call() {
        let clock = Arc::new(ManualClock::new(START));
        let store = RecordOnlyStore(InMemoryCounterStore::with_clock(clock.clone()));
        let limiter = SlidingWindowLimiter::new(Arc::new(store), clock.clone());
        let key = KeyBuilder::new("t").build("k").unwrap();
        let window = Duration::from_secs(10);

        limiter.check(&key, 2, window).await.unwrap();
        clock.advance(Duration::from_secs(3));
        let result = limiter.check(&key, 2, window).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.total_hits, 2);
        assert_eq!(result.reset_at, (START / 1000) as i64 + 10);
    }
}
