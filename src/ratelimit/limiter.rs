//! Public rate limiter entry point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::backend::{AdmissionAlgorithm, Algorithm};
use super::fixed::FixedWindowLimiter;
use super::key::KeyBuilder;
use super::policy::PolicySet;
use super::result::RateLimitResult;
use super::sliding::SlidingWindowLimiter;
use crate::clock::{Clock, SystemClock};
use crate::config::LimiterSettings;
use crate::error::{FloodgateError, Result};
use crate::store::{CounterStore, StoreError};

/// Longest window a check may ask for, one leap year in seconds.
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

/// Running totals since the limiter was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    /// Admission checks that passed validation
    pub checks: u64,
    /// Checks answered with `allowed = false`
    pub rejections: u64,
    /// Checks admitted because the store failed or timed out
    pub fail_opens: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    checks: AtomicU64,
    rejections: AtomicU64,
    fail_opens: AtomicU64,
}

/// The rate limiter callers talk to.
///
/// Validates arguments, derives the store key, runs the chosen algorithm
/// under the store timeout, and fails open when the store cannot answer.
/// A store outage therefore disables limiting rather than rejecting
/// legitimate traffic.
///
/// This struct is thread-safe and can be shared across tasks; it holds no
/// counts itself.
pub struct RateLimiter<S: CounterStore> {
    store: Arc<S>,
    keys: KeyBuilder,
    fixed: FixedWindowLimiter<S>,
    sliding: SlidingWindowLimiter<S>,
    policies: RwLock<PolicySet>,
    default_algorithm: Algorithm,
    store_timeout: Duration,
    clock: Arc<dyn Clock>,
    stats: StatCounters,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a limiter over `store` using the system clock.
    pub fn new(store: Arc<S>, settings: &LimiterSettings) -> Self {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    /// Create a limiter over `store` with an explicit time source.
    pub fn with_clock(store: Arc<S>, settings: &LimiterSettings, clock: Arc<dyn Clock>) -> Self {
        info!(
            key_prefix = %settings.key_prefix,
            default_algorithm = %settings.default_algorithm,
            store_timeout_ms = settings.store_timeout_ms,
            "Rate limiter initialized"
        );

        Self {
            fixed: FixedWindowLimiter::new(store.clone(), clock.clone()),
            sliding: SlidingWindowLimiter::new(store.clone(), clock.clone()),
            store,
            keys: KeyBuilder::new(settings.key_prefix.clone()),
            policies: RwLock::new(PolicySet::new()),
            default_algorithm: settings.default_algorithm,
            store_timeout: settings.store_timeout(),
            clock,
            stats: StatCounters::default(),
        }
    }

    /// Attach a set of named policies.
    pub fn with_policies(self, policies: PolicySet) -> Self {
        self.set_policies(policies);
        self
    }

    /// Replace the named policies.
    pub fn set_policies(&self, policies: PolicySet) {
        info!(
            count = policies.len(),
            names = ?policies.names().collect::<Vec<_>>(),
            "Rate limit policies updated"
        );
        *self.policies.write() = policies;
    }

    /// The underlying counter store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The key builder for unscoped checks.
    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Count one attempt by `identity` and decide whether it is admitted.
    ///
    /// Returns a validation error for an empty identity, a zero limit, or a
    /// window that is zero or longer than [`MAX_WINDOW_SECS`]. Store failures
    /// never surface here; they produce an admitting result instead.
    pub async fn check(
        &self,
        identity: &str,
        limit: u64,
        window_secs: u64,
        algorithm: Algorithm,
    ) -> Result<RateLimitResult> {
        self.admit(&self.keys, identity, limit, window_secs, algorithm)
            .await
    }

    /// [`check`](Self::check) with the configured default algorithm.
    pub async fn check_default(
        &self,
        identity: &str,
        limit: u64,
        window_secs: u64,
    ) -> Result<RateLimitResult> {
        self.check(identity, limit, window_secs, self.default_algorithm)
            .await
    }

    /// Check `identity` against the named policy.
    ///
    /// Each policy counts in its own key namespace.
    pub async fn check_policy(&self, policy: &str, identity: &str) -> Result<RateLimitResult> {
        let policy = self
            .policies
            .read()
            .get(policy)
            .cloned()
            .ok_or_else(|| FloodgateError::Validation(format!("unknown policy '{}'", policy)))?;

        let keys = self.keys.scoped(&policy.name);
        let algorithm = policy.algorithm.unwrap_or(self.default_algorithm);
        self.admit(&keys, identity, policy.limit, policy.window_secs, algorithm)
            .await
    }

    /// Forget all recorded attempts for `identity` in the unscoped namespace.
    pub async fn reset(&self, identity: &str) -> Result<()> {
        let key = self.keys.build(identity)?;
        self.store.delete(key.as_str()).await?;
        debug!(key = %key, "Rate limit state reset");
        Ok(())
    }

    /// Forget all recorded attempts for `identity` under a named policy.
    pub async fn reset_policy(&self, policy: &str, identity: &str) -> Result<()> {
        let key = self.keys.scoped(policy).build(identity)?;
        self.store.delete(key.as_str()).await?;
        debug!(key = %key, "Rate limit state reset");
        Ok(())
    }

    /// Totals of checks, rejections and fail-opens.
    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            checks: self.stats.checks.load(Ordering::Relaxed),
            rejections: self.stats.rejections.load(Ordering::Relaxed),
            fail_opens: self.stats.fail_opens.load(Ordering::Relaxed),
        }
    }

    fn algorithm(&self, algorithm: Algorithm) -> &dyn AdmissionAlgorithm {
        match algorithm {
            Algorithm::FixedWindow => &self.fixed,
            Algorithm::SlidingWindow => &self.sliding,
        }
    }

    async fn admit(
        &self,
        keys: &KeyBuilder,
        identity: &str,
        limit: u64,
        window_secs: u64,
        algorithm: Algorithm,
    ) -> Result<RateLimitResult> {
        if limit == 0 {
            return Err(FloodgateError::Validation(
                "limit must be positive".to_string(),
            ));
        }
        if window_secs == 0 {
            return Err(FloodgateError::Validation(
                "window must be positive".to_string(),
            ));
        }
        if window_secs > MAX_WINDOW_SECS {
            return Err(FloodgateError::Validation(format!(
                "window must not exceed {} seconds",
                MAX_WINDOW_SECS
            )));
        }
        let key = keys.build(identity)?;
        let window = Duration::from_secs(window_secs);

        trace!(
            key = %key,
            limit,
            window_secs,
            algorithm = %algorithm,
            "Checking rate limit"
        );
        self.stats.checks.fetch_add(1, Ordering::Relaxed);

        let outcome = tokio::time::timeout(
            self.store_timeout,
            self.algorithm(algorithm).check(&key, limit, window),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout(self.store_timeout)));

        match outcome {
            Ok(result) => {
                if !result.allowed {
                    self.stats.rejections.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        key = %key,
                        total_hits = result.total_hits,
                        limit,
                        reset_at = result.reset_at,
                        "Rate limit exceeded"
                    );
                }
                Ok(result)
            }
            Err(error) => {
                self.stats.fail_opens.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %key,
                    algorithm = %algorithm,
                    error = %error,
                    "Counter store unavailable, failing open"
                );
                Ok(RateLimitResult::fail_open(
                    limit,
                    self.clock.now_secs(),
                    window_secs,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::policy::Policy;
    use crate::store::{InMemoryCounterStore, LogHit, WindowHit};
    use async_trait::async_trait;

    const START: u64 = 1_700_000_000_000;

    /// A store whose every call fails.
    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn increment_with_expiry(
            &self,
            _key: &str,
            _window: Duration,
        ) -> std::result::Result<WindowHit, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn record_and_count_in_window(
            &self,
            _key: &str,
            _now_millis: u64,
            _window_millis: u64,
        ) -> std::result::Result<LogHit, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn oldest_entry_timestamp(
            &self,
            _key: &str,
        ) -> std::result::Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn ping(&self) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    /// A store that never answers in time.
    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        async fn increment_with_expiry(
            &self,
            _key: &str,
            _window: Duration,
        ) -> std::result::Result<WindowHit, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(WindowHit {
                count: 1,
                expires_in: None,
            })
        }

        async fn record_and_count_in_window(
            &self,
            _key: &str,
            _now_millis: u64,
            _window_millis: u64,
        ) -> std::result::Result<LogHit, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(LogHit {
                count: 1,
                oldest_millis: None,
            })
        }

        async fn oldest_entry_timestamp(
            &self,
            _key: &str,
        ) -> std::result::Result<Option<u64>, StoreError> {
            Ok(None)
        }

        async fn delete(&self, _key: &str) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn ping(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    fn memory_limiter() -> (Arc<ManualClock>, RateLimiter<InMemoryCounterStore>) {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let limiter = RateLimiter::with_clock(store, &LimiterSettings::default(), clock.clone());
        (clock, limiter)
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (_clock, limiter) = memory_limiter();

        for (identity, limit, window) in [
            ("", 5, 60),
            ("a", 0, 60),
            ("a", 5, 0),
            ("a", 1, MAX_WINDOW_SECS + 1),
            ("a", 1, u64::MAX / 1000),
        ] {
            for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingWindow] {
                let result = limiter.check(identity, limit, window, algorithm).await;
                assert!(matches!(result, Err(FloodgateError::Validation(_))));
            }
        }
        assert_eq!(limiter.stats().checks, 0);
    }

    #[tokio::test]
    async fn test_fail_open_on_store_error() {
        let clock = Arc::new(ManualClock::new(START));
        let limiter =
            RateLimiter::with_clock(Arc::new(FailingStore), &LimiterSettings::default(), clock);

        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingWindow] {
            let result = limiter.check("ip:1.2.3.4", 5, 60, algorithm).await.unwrap();
            assert!(result.allowed);
            assert_eq!(result.remaining, 5);
            assert_eq!(result.total_hits, 0);
            assert_eq!(result.reset_at, (START / 1000) as i64 + 60);
        }

        let stats = limiter.stats();
        assert_eq!(stats.checks, 2);
        assert_eq!(stats.fail_opens, 2);
    }

    #[tokio::test]
    async fn test_fail_open_on_timeout() {
        let settings = LimiterSettings {
            store_timeout_ms: 20,
            ..Default::default()
        };
        let limiter = RateLimiter::new(Arc::new(StalledStore), &settings);

        let result = limiter
            .check("user:slow", 3, 60, Algorithm::FixedWindow)
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 3);
        assert_eq!(result.total_hits, 0);
        assert_eq!(limiter.stats().fail_opens, 1);
    }

    #[tokio::test]
    async fn test_reset_surfaces_store_errors() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), &LimiterSettings::default());
        assert!(matches!(
            limiter.reset("user:abc").await,
            Err(FloodgateError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_default_algorithm_is_sliding() {
        let (_clock, limiter) = memory_limiter();

        for _ in 0..2 {
            limiter.check_default("k", 1, 60).await.unwrap();
        }
        // The sliding log holds both attempts; no fixed counter was created
        assert_eq!(
            limiter
                .store()
                .oldest_entry_timestamp("ratelimit:k")
                .await
                .unwrap(),
            Some(START)
        );
        assert_eq!(limiter.stats().rejections, 1);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let (_clock, limiter) = memory_limiter();

        limiter.check("k", 1, 60, Algorithm::FixedWindow).await.unwrap();
        let denied = limiter.check("k", 1, 60, Algorithm::FixedWindow).await.unwrap();
        assert!(!denied.allowed);

        limiter.reset("k").await.unwrap();
        let result = limiter.check("k", 1, 60, Algorithm::FixedWindow).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.total_hits, 1);
    }

    #[tokio::test]
    async fn test_policies() {
        let (_clock, limiter) = memory_limiter();
        let mut policies = PolicySet::new();
        policies
            .insert(Policy::new("login", 2, 60).with_algorithm(Algorithm::FixedWindow))
            .unwrap();
        policies.insert(Policy::new("search", 3, 60)).unwrap();
        let limiter = limiter.with_policies(policies);

        assert!(limiter.check_policy("login", "user:1").await.unwrap().allowed);
        assert!(limiter.check_policy("login", "user:1").await.unwrap().allowed);
        assert!(!limiter.check_policy("login", "user:1").await.unwrap().allowed);

        // Other policies and unscoped checks count separately
        let search = limiter.check_policy("search", "user:1").await.unwrap();
        assert!(search.allowed);
        assert_eq!(search.total_hits, 1);
        let plain = limiter
            .check("user:1", 2, 60, Algorithm::FixedWindow)
            .await
            .unwrap();
        assert_eq!(plain.total_hits, 1);

        limiter.reset_policy("login", "user:1").await.unwrap();
        assert!(limiter.check_policy("login", "user:1").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_both_algorithms_on_one_identity() {
        let (_clock, limiter) = memory_limiter();

        for _ in 0..3 {
            limiter.check("ip:x", 3, 60, Algorithm::FixedWindow).await.unwrap();
        }
        let sliding = limiter
            .check("ip:x", 3, 60, Algorithm::SlidingWindow)
            .await
            .unwrap();
        assert!(sliding.allowed);
        assert_eq!(sliding.total_hits, 1);

        let fixed = limiter
            .check("ip:x", 3, 60, Algorithm::FixedWindow)
            .await
            .unwrap();
        assert!(!fixed.allowed);
        assert_eq!(fixed.total_hits, 4);
        assert_eq!(limiter.stats().fail_opens, 0);

        // Reset covers both algorithms
        limiter.reset("ip:x").await.unwrap();
        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingWindow] {
            let result = limiter.check("ip:x", 3, 60, algorithm).await.unwrap();
            assert_eq!(result.total_hits, 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_policy() {
        let (_clock, limiter) = memory_limiter();
        assert!(matches!(
            limiter.check_policy("missing", "user:1").await,
            Err(FloodgateError::Validation(_))
        ));
    }
}
