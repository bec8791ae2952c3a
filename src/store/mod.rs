//! Bucket state storage.
//!
//! The limiter keeps no bucket in memory between calls; every key's state
//! lives in a [`KeyStore`]. A store is either synchronous ([`SyncStore`]) or
//! asynchronous ([`AsyncStore`]), and which one is declared when the
//! [`KeyStore`] is built rather than discovered at runtime.

mod adapter;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::ratelimit::BucketSnapshot;

pub(crate) use adapter::StoreAdapter;
pub use memory::{MemoryTable, DEFAULT_MAX_KEYS};

/// Errors reported by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("snapshot encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A store whose operations complete immediately.
pub trait SyncStore: Send + Sync {
    /// Fetch the snapshot stored for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<BucketSnapshot>, StoreError>;

    /// Store `snapshot` for `key`, replacing any previous value.
    fn put(&self, key: &str, snapshot: BucketSnapshot) -> Result<(), StoreError>;
}

/// A store whose operations suspend, e.g. a network-backed key/value service.
#[async_trait]
pub trait AsyncStore: Send + Sync {
    /// Fetch the snapshot stored for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<BucketSnapshot>, StoreError>;

    /// Store `snapshot` for `key`, replacing any previous value.
    async fn put(&self, key: &str, snapshot: BucketSnapshot) -> Result<(), StoreError>;
}

/// A store handed to the limiter, tagged with its calling convention.
#[derive(Clone)]
pub enum KeyStore {
    Sync(Arc<dyn SyncStore>),
    Async(Arc<dyn AsyncStore>),
}

impl KeyStore {
    /// Wrap a synchronous store.
    pub fn sync<S: SyncStore + 'static>(store: S) -> Self {
        KeyStore::Sync(Arc::new(store))
    }

    /// Wrap an asynchronous store.
    pub fn asynchronous<S: AsyncStore + 'static>(store: S) -> Self {
        KeyStore::Async(Arc::new(store))
    }

    /// The default bounded in-memory table.
    pub fn memory(max_keys: usize) -> Self {
        KeyStore::sync(MemoryTable::new(max_keys))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, KeyStore::Async(_))
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStore::Sync(_) => write!(f, "KeyStore::Sync"),
            KeyStore::Async(_) => write!(f, "KeyStore::Async"),
        }
    }
}

impl<S: SyncStore + ?Sized> SyncStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<BucketSnapshot>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, snapshot: BucketSnapshot) -> Result<(), StoreError> {
        (**self).put(key, snapshot)
    }
}

#[async_trait]
impl<S: AsyncStore + ?Sized> AsyncStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<BucketSnapshot>, StoreError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, snapshot: BucketSnapshot) -> Result<(), StoreError> {
        (**self).put(key, snapshot).await
    }
}
