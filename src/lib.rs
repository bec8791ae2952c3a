//! Tokengate - Keyed Token-Bucket Rate Limiting
//!
//! This crate decides, per caller-supplied key, whether an action may proceed
//! or should be throttled. Each key owns a continuously replenishing token
//! bucket whose state is kept in a pluggable store, synchronous or
//! asynchronous, and checks against the store are serialized so concurrent
//! callers never lose an update.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use config::{LimiterConfig, Override};
pub use error::{LimiterError, Result};
pub use ratelimit::{Decision, Exclusion, RateLimiter};
pub use store::{AsyncStore, KeyStore, MemoryTable, StoreError, SyncStore};
