//! Admission decision returned to callers.

use serde::{Deserialize, Serialize};

/// Header carrying the seconds until a rejected caller may retry.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";
/// Header carrying the admissions left in the current window.
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// Header carrying the reset time as Unix seconds.
pub const RESET_HEADER: &str = "X-RateLimit-Reset";

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the operation may proceed.
    pub allowed: bool,
    /// Further admissions permitted before `reset_at`.
    pub remaining: u64,
    /// Earliest Unix time (seconds) at which capacity is guaranteed again.
    pub reset_at: i64,
    /// Hits counted in the window, including this one.
    pub total_hits: u64,
}

impl RateLimitResult {
    /// The result handed out when the store cannot be consulted.
    pub fn fail_open(limit: u64, now_secs: i64, window_secs: u64) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            reset_at: now_secs.saturating_add(i64::try_from(window_secs).unwrap_or(i64::MAX)),
            total_hits: 0,
        }
    }

    /// Seconds from `now_secs` until `reset_at`, never negative.
    pub fn retry_after_secs(&self, now_secs: i64) -> u64 {
        self.reset_at.saturating_sub(now_secs).max(0) as u64
    }

    /// Response headers an HTTP caller should attach.
    ///
    /// Rejections carry `Retry-After`; admissions carry the remaining quota
    /// and reset time.
    pub fn headers(&self, now_secs: i64) -> Vec<(&'static str, String)> {
        if self.allowed {
            vec![
                (REMAINING_HEADER, self.remaining.to_string()),
                (RESET_HEADER, self.reset_at.to_string()),
            ]
        } else {
            vec![(RETRY_AFTER_HEADER, self.retry_after_secs(now_secs).to_string())]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_open_shape() {
        let result = RateLimitResult::fail_open(10, 1_000, 60);
        assert!(result.allowed);
        assert_eq!(result.remaining, 10);
        assert_eq!(result.reset_at, 1_060);
        assert_eq!(result.total_hits, 0);
    }

    #[test]
    fn test_fail_open_saturates_reset() {
        let result = RateLimitResult::fail_open(1, 1_000, u64::MAX);
        assert_eq!(result.reset_at, i64::MAX);
    }

    #[test]
    fn test_retry_after_is_clamped() {
        let result = RateLimitResult {
            allowed: false,
            remaining: 0,
            reset_at: 1_030,
            total_hits: 6,
        };
        assert_eq!(result.retry_after_secs(1_000), 30);
        assert_eq!(result.retry_after_secs(2_000), 0);
    }

    #[test]
    fn test_headers() {
        let denied = RateLimitResult {
            allowed: false,
            remaining: 0,
            reset_at: 1_060,
            total_hits: 6,
        };
        assert_eq!(denied.headers(1_000), vec![(RETRY_AFTER_HEADER, "60".to_string())]);

        let admitted = RateLimitResult {
            allowed: true,
            remaining: 4,
            ..denied
        };
        assert_eq!(
            admitted.headers(1_000),
            vec![
                (REMAINING_HEADER, "4".to_string()),
                (RESET_HEADER, "1060".to_string()),
            ]
        );
    }

    #[test]
    fn test_serializes_camel_case() {
        let result = RateLimitResult::fail_open(5, 100, 60);
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "allowed": true,
                "remaining": 5,
                "resetAt": 160,
                "totalHits": 0
            })
        );
    }
}
