//! Rate limiting logic and bucket state.

pub(crate) mod bucket;
mod flight;
mod limiter;

pub use bucket::{Bucket, BucketSnapshot, DEFAULT_WINDOW_MS};
pub use flight::Exclusion;
pub use limiter::{Decision, LimitConfig, RateLimiter};
