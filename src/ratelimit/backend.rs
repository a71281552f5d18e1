//! Admission algorithm trait shared by the fixed and sliding limiters.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::key::LimiterKey;
use super::result::RateLimitResult;
use crate::error::FloodgateError;
use crate::store::StoreError;

/// Which admission algorithm to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// Counter per window; cheap, but admits up to twice the limit across a
    /// window boundary.
    #[serde(rename = "fixed", alias = "fixed_window")]
    FixedWindow,
    /// Timestamped log per identity; precise.
    #[default]
    #[serde(rename = "sliding", alias = "sliding_window")]
    SlidingWindow,
}

impl Algorithm {
    /// Short name used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed",
            Algorithm::SlidingWindow => "sliding",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = FloodgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" | "fixed_window" => Ok(Algorithm::FixedWindow),
            "sliding" | "sliding_window" => Ok(Algorithm::SlidingWindow),
            other => Err(FloodgateError::Validation(format!(
                "unknown algorithm '{}', expected 'fixed' or 'sliding'",
                other
            ))),
        }
    }
}

/// An admission algorithm evaluated against the shared counter store.
///
/// Implementations hold no counts of their own. Store errors are returned
/// as-is; the fail-open policy belongs to the caller.
#[async_trait]
pub trait AdmissionAlgorithm: Send + Sync {
    /// The algorithm this implementation provides.
    fn algorithm(&self) -> Algorithm;

    /// Count one attempt for `key` and decide whether it is admitted.
    async fn check(
        &self,
        key: &LimiterKey,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitResult, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("fixed".parse::<Algorithm>().unwrap(), Algorithm::FixedWindow);
        assert_eq!("Sliding".parse::<Algorithm>().unwrap(), Algorithm::SlidingWindow);
        assert_eq!(
            "sliding_window".parse::<Algorithm>().unwrap(),
            Algorithm::SlidingWindow
        );
        assert!(matches!(
            "token_bucket".parse::<Algorithm>(),
            Err(FloodgateError::Validation(_))
        ));
    }

    #[test]
    fn test_algorithm_serde_names() {
        let parsed: Algorithm = serde_yaml::from_str("fixed").unwrap();
        assert_eq!(parsed, Algorithm::FixedWindow);
        assert_eq!(
            serde_json::to_string(&Algorithm::SlidingWindow).unwrap(),
            "\"sliding\""
        );
    }
}
