//! Error types for Floodgate.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Floodgate operations.
///
/// Store failures only reach this type from administrative calls such as
/// [`RateLimiter::reset`](crate::ratelimit::RateLimiter::reset); admission
/// checks absorb them through fail-open.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Invalid arguments to a limiter call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for FloodgateError {
    fn from(err: config::ConfigError) -> Self {
        FloodgateError::Config(err.to_string())
    }
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
