//! Flight slots serializing read-modify-write cycles against the store.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// How the limiter excludes concurrent store cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    /// One cycle at a time across all keys.
    #[default]
    Global,
    /// One cycle at a time per key; different keys proceed in parallel.
    PerKey,
}

/// The set of slots a limiter hands out.
pub(crate) enum FlightSlots {
    Global(Arc<Mutex<()>>),
    PerKey(DashMap<String, Arc<Mutex<()>>>),
}

impl FlightSlots {
    pub(crate) fn new(exclusion: Exclusion) -> Self {
        match exclusion {
            Exclusion::Global => FlightSlots::Global(Arc::new(Mutex::new(()))),
            Exclusion::PerKey => FlightSlots::PerKey(DashMap::new()),
        }
    }

    /// Wait until the slot covering `key` is free and take it.
    ///
    /// Waiters are served in arrival order.
    pub(crate) async fn acquire<'a>(&'a self, key: &str) -> FlightGuard<'a> {
        match self {
            FlightSlots::Global(slot) => FlightGuard {
                guard: Some(Arc::clone(slot).lock_owned().await),
                release: None,
            },
            FlightSlots::PerKey(slots) => {
                let slot = Arc::clone(
                    slots
                        .entry(key.to_string())
                        .or_insert_with(|| Arc::new(Mutex::new(())))
                        .value(),
                );
                FlightGuard {
                    guard: Some(slot.lock_owned().await),
                    release: Some((slots, key.to_string())),
                }
            }
        }
    }

    /// Number of per-key slots currently allocated.
    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        match self {
            FlightSlots::Global(_) => 1,
            FlightSlots::PerKey(slots) => slots.len(),
        }
    }
}

/// Holds a flight slot until dropped.
pub(crate) struct FlightGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    release: Option<(&'a DashMap<String, Arc<Mutex<()>>>, String)>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Free the per-key slot once nobody holds or awaits it.
        if let Some((slots, key)) = self.release.take() {
            slots.remove_if(&key, |_, slot| Arc::strong_count(slot) == 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_global_slot_blocks_other_keys() {
        let slots = Arc::new(FlightSlots::new(Exclusion::Global));
        let guard = slots.acquire("a").await;

        let other = Arc::clone(&slots);
        let waiter = tokio::spawn(async move {
            let _guard = other.acquire("b").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_per_key_slots_are_independent() {
        let slots = FlightSlots::new(Exclusion::PerKey);
        let _a = slots.acquire("a").await;

        let b = tokio::time::timeout(Duration::from_millis(100), slots.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_per_key_slot_excludes_same_key() {
        let slots = FlightSlots::new(Exclusion::PerKey);
        let _a = slots.acquire("a").await;

        let again = tokio::time::timeout(Duration::from_millis(50), slots.acquire("a")).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_idle_per_key_slots_are_released() {
        let slots = FlightSlots::new(Exclusion::PerKey);
        {
            let _a = slots.acquire("a").await;
            let _b = slots.acquire("b").await;
            assert_eq!(slots.allocated(), 2);
        }
        assert_eq!(slots.allocated(), 0);
    }
}
