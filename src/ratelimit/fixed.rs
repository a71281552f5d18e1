//! Fixed-window counter limiter.
//!
//! Each identity gets one counter that lives for a single window, starting at
//! its first hit. Counting resets sharply when the counter expires, so a
//! client can be admitted up to `2 × limit` times across a boundary: `limit`
//! at the end of one window and `limit` again at the start of the next.
//! Callers needing a hard bound should use the sliding limiter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::backend::{AdmissionAlgorithm, Algorithm};
use super::key::LimiterKey;
use super::result::RateLimitResult;
use crate::clock::{millis_to_secs_ceil, Clock};
use crate::store::{CounterStore, StoreError};

/// Counter-per-window admission.
pub struct FixedWindowLimiter<S: CounterStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: CounterStore> FixedWindowLimiter<S> {
    /// Create a limiter over `store`.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl<S: CounterStore> AdmissionAlgorithm for FixedWindowLimiter<S> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    async fn check(
        &self,
        key: &LimiterKey,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitResult, StoreError> {
        let now = self.clock.now_millis();
        let hit = self.store.increment_with_expiry(key.as_str(), window).await?;

        // Without a reported TTL, assume the window began with this hit.
        let until_reset = hit.expires_in.unwrap_or(window);
        let until_reset_ms = u64::try_from(until_reset.as_millis()).unwrap_or(u64::MAX);
        let reset_at = millis_to_secs_ceil(now.saturating_add(until_reset_ms));

        trace!(
            key = %key,
            count = hit.count,
            limit,
            reset_at,
            "Fixed window check"
        );

        Ok(RateLimitResult {
            allowed: hit.count <= limit,
            remaining: limit.saturating_sub(hit.count),
            reset_at,
            total_hits: hit.count,
        })
    }
}
