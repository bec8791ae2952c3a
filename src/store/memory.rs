//! Bounded in-memory bucket table.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::trace;

use super::{StoreError, SyncStore};
use crate::ratelimit::BucketSnapshot;

/// Default maximum number of resident keys.
pub const DEFAULT_MAX_KEYS: usize = 10000;

struct Slot {
    snapshot: BucketSnapshot,
    last_used: u64,
}

struct Inner {
    slots: HashMap<String, Slot>,
    /// Last-use tick to key, oldest first
    recency: BTreeMap<u64, String>,
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Mark `key` as used at a fresh tick. Returns false if it is not resident.
    fn touch(&mut self, key: &str) -> bool {
        let now = self.tick();
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };

        let previous = std::mem::replace(&mut slot.last_used, now);
        let owned = self
            .recency
            .remove(&previous)
            .unwrap_or_else(|| key.to_string());
        self.recency.insert(now, owned);
        true
    }

    fn evict_oldest(&mut self) -> bool {
        match self.recency.pop_first() {
            Some((_, oldest)) => {
                trace!(key = %oldest, "Evicting least recently used bucket");
                self.slots.remove(&oldest);
                true
            }
            None => false,
        }
    }
}

/// In-process store holding at most `max_keys` buckets.
///
/// When a new key would exceed the cap, the least recently used key is
/// dropped. A dropped key simply starts over with a full bucket.
pub struct MemoryTable {
    inner: Mutex<Inner>,
    max_keys: usize,
}

impl MemoryTable {
    /// Create a table capped at `max_keys` entries (at least one).
    pub fn new(max_keys: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                recency: BTreeMap::new(),
                clock: 0,
            }),
            max_keys: max_keys.max(1),
        }
    }

    /// Maximum number of resident keys.
    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Number of resident keys.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is resident, without touching its recency.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    /// Drop every key.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.recency.clear();
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEYS)
    }
}

impl SyncStore for MemoryTable {
    fn get(&self, key: &str) -> Result<Option<BucketSnapshot>, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.touch(key) {
            return Ok(None);
        }
        Ok(inner.slots.get(key).map(|slot| slot.snapshot))
    }

    fn put(&self, key: &str, snapshot: BucketSnapshot) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        if inner.touch(key) {
            if let Some(slot) = inner.slots.get_mut(key) {
                slot.snapshot = snapshot;
            }
            return Ok(());
        }

        while inner.slots.len() >= self.max_keys {
            if !inner.evict_oldest() {
                break;
            }
        }

        let now = inner.tick();
        inner.slots.insert(
            key.to_string(),
            Slot {
                snapshot,
                last_used: now,
            },
        );
        inner.recency.insert(now, key.to_string());
        Ok(())
    }
}
