//! Per-key single-flight locks.
//!
//! Resolvers hold the lock of a `(namespace, key)` pair across
//! lookup, network fetch and cache write, so concurrent callers wait for the
//! first one and then find its result in the store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::Namespace;

type Slot = Arc<Mutex<()>>;

#[derive(Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<(Namespace, String), Slot>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `(namespace, key)`.
    pub async fn acquire(&self, namespace: Namespace, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            // Drop slots nobody holds or waits on
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots
                .entry((namespace, key.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Number of live lock slots.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(Namespace::GroupSharedKeys, "c1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.acquire(Namespace::GroupSharedKeys, "c1").await;
        let _b = locks.acquire(Namespace::GroupSharedKeys, "c2").await;
        let _c = locks.acquire(Namespace::PeerPublicKeys, "c1").await;
        assert_eq!(locks.len().await, 3);
    }

    #[tokio::test]
    async fn test_released_slots_are_pruned() {
        let locks = KeyLocks::new();
        {
            let _guard = locks.acquire(Namespace::SelfKeys, "u1").await;
        }
        let _other = locks.acquire(Namespace::SelfKeys, "u2").await;
        assert_eq!(locks.len().await, 1);
    }
}
