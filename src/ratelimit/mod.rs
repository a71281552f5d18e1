//! Admission algorithms and the limiter facade.

mod backend;
mod fixed;
mod key;
mod limiter;
mod policy;
mod result;
mod sliding;

pub use backend::{AdmissionAlgorithm, Algorithm};
pub use fixed::FixedWindowLimiter;
pub use key::{KeyBuilder, LimiterKey};
pub use limiter::{LimiterStats, RateLimiter, MAX_WINDOW_SECS};
pub use policy::{Policy, PolicySet};
pub use result::{RateLimitResult, REMAINING_HEADER, RESET_HEADER, RETRY_AFTER_HEADER};
pub use sliding::SlidingWindowLimiter;
