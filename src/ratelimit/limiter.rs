//! Core rate limiter implementation.

use tracing::{debug, trace, warn};

use super::bucket::{Bucket, BucketSnapshot, DEFAULT_WINDOW_MS};
use super::flight::FlightSlots;
use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::store::{KeyStore, StoreAdapter};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// The key is not tracked; no bucket was consulted.
    Bypassed,
    /// A token was taken.
    Allowed,
    /// Not enough tokens; the caller should throttle.
    Limited,
}

impl Decision {
    /// `Some(true)` to throttle, `Some(false)` to proceed, `None` when the key
    /// bypassed limiting.
    pub fn limited(&self) -> Option<bool> {
        match self {
            Decision::Bypassed => None,
            Decision::Allowed => Some(false),
            Decision::Limited => Some(true),
        }
    }

    pub fn is_limited(&self) -> bool {
        matches!(self, Decision::Limited)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Bypassed => write!(f, "bypassed"),
            Decision::Allowed => write!(f, "allowed"),
            Decision::Limited => write!(f, "limited"),
        }
    }
}

/// Limits in effect for one key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitConfig {
    /// Tokens replenished per window
    pub rate: f64,
    /// Bucket capacity
    pub burst: f64,
    /// Window length in milliseconds
    pub window: u64,
}

/// A keyed token-bucket rate limiter.
///
/// Bucket state lives in the configured [`KeyStore`]; every check reads the
/// key's bucket, consumes from it and writes it back while holding a flight
/// slot, so no two checks sharing a slot interleave their store cycles.
pub struct RateLimiter {
    config: LimiterConfig,
    store: StoreAdapter,
    slots: FlightSlots,
}

impl RateLimiter {
    /// Create a limiter backed by a bounded in-memory table of
    /// `config.max_keys` entries.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        let store = KeyStore::memory(config.max_keys);
        Self::with_store(config, store)
    }

    /// Create a limiter backed by `store`.
    pub fn with_store(config: LimiterConfig, store: KeyStore) -> Result<Self> {
        config.validate()?;

        debug!(
            rate = config.rate,
            burst = config.burst(),
            window_ms = config.window,
            overrides = config.overrides.len(),
            exclusion = ?config.exclusion,
            store = ?store,
            "Rate limiter created"
        );

        Ok(Self {
            slots: FlightSlots::new(config.exclusion),
            store: StoreAdapter::new(store),
            config,
        })
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Check whether one action for `key` may proceed.
    ///
    /// A missing key (`None`) bypasses limiting without touching the store.
    /// Every `Some` key is limited, including the empty string.
    pub async fn check<'k>(&self, key: impl Into<Option<&'k str>>) -> Result<Decision> {
        self.check_hits(key, 1).await
    }

    /// Check whether an action costing `hits` tokens may proceed.
    ///
    /// A read failure is returned with no decision. A write failure is
    /// returned as [`LimiterError::StorageWrite`] carrying the decision that
    /// was already made.
    pub async fn check_hits<'k>(
        &self,
        key: impl Into<Option<&'k str>>,
        hits: u32,
    ) -> Result<Decision> {
        let key: Option<&str> = key.into();
        let Some(key) = key else {
            trace!("No key given, bypassing rate limit");
            return Ok(Decision::Bypassed);
        };

        let Some(limit) = self.get_limit_config(key) else {
            debug!(key = %key, "Rate limiting disabled for key");
            return Ok(Decision::Bypassed);
        };

        trace!(key = %key, hits = hits, "Checking rate limit");

        let slot = self.slots.acquire(key).await;

        let snapshot = match self.store.get(key).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read bucket state");
                return Err(LimiterError::StorageRead(e));
            }
        };

        let mut bucket = match snapshot {
            Some(snapshot) => Bucket::from_snapshot(snapshot),
            None => {
                debug!(
                    key = %key,
                    rate = limit.rate,
                    burst = limit.burst,
                    window_ms = limit.window,
                    "Creating new bucket"
                );
                Bucket::new(limit.burst, limit.rate, limit.window)
            }
        };

        let decision = if bucket.consume(f64::from(hits)) {
            Decision::Allowed
        } else {
            debug!(key = %key, tokens = bucket.tokens(), "Rate limit exceeded");
            Decision::Limited
        };

        let written = self.store.put(key, bucket.snapshot()).await;
        drop(slot);

        match written {
            Ok(()) => Ok(decision),
            Err(source) => {
                warn!(key = %key, error = %source, decision = %decision, "Failed to write bucket state");
                Err(LimiterError::StorageWrite { decision, source })
            }
        }
    }

    /// Read the stored bucket state for `key` without consuming from it.
    pub async fn peek(&self, key: &str) -> Result<Option<BucketSnapshot>> {
        let _slot = self.slots.acquire(key).await;
        self.store.get(key).await.map_err(LimiterError::StorageRead)
    }

    /// Get the limits in effect for `key`.
    ///
    /// Returns `None` when limiting is disabled for the key. A non-empty
    /// override replaces all three defaults, including the ones it leaves
    /// unset.
    pub fn get_limit_config(&self, key: &str) -> Option<LimitConfig> {
        let (rate, burst, window) = match self.config.overrides.get(key) {
            Some(limits) if !limits.is_empty() => (limits.rate, limits.burst, limits.window),
            _ => (
                Some(self.config.rate),
                Some(self.config.burst()),
                Some(self.config.window),
            ),
        };

        let rate = rate.filter(|rate| *rate > 0.0)?;
        let burst = burst.filter(|burst| *burst > 0.0)?;
        let window = window.filter(|window| *window > 0).unwrap_or(DEFAULT_WINDOW_MS);

        Some(LimitConfig {
            rate,
            burst,
            window,
        })
    }
}
