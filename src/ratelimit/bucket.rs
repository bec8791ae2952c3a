//! Token bucket implementation.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Default refill window in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 1000;

/// Persisted state of a single key's bucket.
///
/// This is everything a store needs to hold to reconstruct a [`Bucket`]
/// exactly as it was left by the previous call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSnapshot {
    /// Maximum number of tokens the bucket holds
    pub capacity: f64,
    /// Tokens added per window
    pub fill_rate: f64,
    /// Window length in milliseconds
    pub window: u64,
    /// Token count at `last_update`
    pub tokens: f64,
    /// Epoch milliseconds of the last replenishment
    pub last_update: i64,
}

impl BucketSnapshot {
    /// Encode the snapshot as JSON, for stores that persist strings.
    pub fn encode(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a snapshot previously produced by [`BucketSnapshot::encode`].
    pub fn decode(raw: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A continuously replenishing token bucket.
///
/// Tokens are credited proportionally to elapsed time rather than in whole
/// window steps, so a bucket with `fill_rate = 2` and a 1000 ms window gains
/// one token every 500 ms.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    capacity: f64,
    fill_rate: f64,
    window: u64,
    tokens: f64,
    last_update: i64,
}

impl Bucket {
    /// Create a full bucket stamped with the current time.
    pub fn new(capacity: f64, fill_rate: f64, window: u64) -> Self {
        Self::new_at(capacity, fill_rate, window, now_millis())
    }

    /// Create a full bucket stamped with `now` (epoch milliseconds).
    pub fn new_at(capacity: f64, fill_rate: f64, window: u64, now: i64) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            capacity,
            fill_rate: fill_rate.max(0.0),
            window,
            tokens: capacity,
            last_update: now,
        }
    }

    /// Rebuild a bucket from persisted state.
    pub fn from_snapshot(snapshot: BucketSnapshot) -> Self {
        Self {
            capacity: snapshot.capacity,
            fill_rate: snapshot.fill_rate,
            window: snapshot.window,
            tokens: snapshot.tokens,
            last_update: snapshot.last_update,
        }
    }

    /// Capture the current state for persistence.
    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            capacity: self.capacity,
            fill_rate: self.fill_rate,
            window: self.window,
            tokens: self.tokens,
            last_update: self.last_update,
        }
    }

    /// Replenish, then try to take `n` tokens.
    ///
    /// Returns `true` if the tokens were taken. On `false` the token count is
    /// left at its replenished value.
    pub fn consume(&mut self, n: f64) -> bool {
        self.consume_at(n, now_millis())
    }

    /// Same as [`Bucket::consume`] with an explicit clock reading.
    pub fn consume_at(&mut self, n: f64, now: i64) -> bool {
        self.replenish(now);

        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    fn replenish(&mut self, now: i64) {
        // A clock that stepped backwards credits nothing.
        let elapsed = now.saturating_sub(self.last_update).max(0) as f64;

        let credited = if self.window == 0 {
            self.capacity
        } else {
            elapsed / self.window as f64 * self.fill_rate
        };

        self.tokens = (self.tokens + credited).min(self.capacity);
        self.last_update = now;
    }

    /// Current token count, as of the last replenishment.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum token count.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens credited per window.
    pub fn fill_rate(&self) -> f64 {
        self.fill_rate
    }

    /// Window length in milliseconds.
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Epoch milliseconds of the last replenishment.
    pub fn last_update(&self) -> i64 {
        self.last_update
    }
}

impl From<BucketSnapshot> for Bucket {
    fn from(snapshot: BucketSnapshot) -> Self {
        Bucket::from_snapshot(snapshot)
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
