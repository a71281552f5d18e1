//! Floodgate - Distributed Rate Limiter
//!
//! Bounds how many operations an identity (IP address, user id, API key) may
//! perform within a time window. Counts live in a shared Redis store, so the
//! limit holds across many concurrent callers and stateless server processes.
//! Two algorithms are offered: a fixed-window counter and a sliding-window
//! log. When the store is unreachable the limiter fails open.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FloodgateError, Result};
pub use ratelimit::{Algorithm, RateLimitResult, RateLimiter};
