//! Uniform asynchronous access to either kind of store.

use super::{KeyStore, StoreError};
use crate::ratelimit::BucketSnapshot;

/// Presents a [`KeyStore`] as a single async get/put pair.
///
/// Synchronous stores are called after yielding to the scheduler once, so
/// every store call is a suspension point regardless of the backend.
#[derive(Debug, Clone)]
pub(crate) struct StoreAdapter {
    store: KeyStore,
}

impl StoreAdapter {
    pub(crate) fn new(store: KeyStore) -> Self {
        Self { store }
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Option<BucketSnapshot>, StoreError> {
        match &self.store {
            KeyStore::Sync(store) => {
                tokio::task::yield_now().await;
                store.get(key)
            }
            KeyStore::Async(store) => store.get(key).await,
        }
    }

    pub(crate) async fn put(&self, key: &str, snapshot: BucketSnapshot) -> Result<(), StoreError> {
        match &self.store {
            KeyStore::Sync(store) => {
                tokio::task::yield_now().await;
                store.put(key, snapshot)
            }
            KeyStore::Async(store) => store.put(key, snapshot).await,
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &KeyStore {
        &self.store
    }
}
