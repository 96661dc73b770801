//! Per-key async locks.
//!
//! An entry lives only while someone holds or waits for its lock, so a
//! long-running process does not accumulate one mutex per proposal or
//! schedule it ever touched.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub(crate) struct KeyedLocks<K: Eq + Hash + Copy> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Wait for exclusive use of `key`.
    pub(crate) async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    /// Keys currently held or waited on.
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

pub(crate) struct KeyGuard<'a, K: Eq + Hash + Copy> {
    locks: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Copy> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        // The map holds one reference; any other belongs to a waiter.
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn released_keys_are_evicted() {
        let locks = KeyedLocks::new();
        for key in 0..100u32 {
            let _guard = locks.lock(key).await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiters_keep_the_entry_alive() {
        let locks = Arc::new(KeyedLocks::new());
        let first = locks.lock(7u32).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(7).await;
                locks.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);

        // The waiter took the same mutex, so the entry survived the handover.
        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn one_holder_per_key() {
        let locks = KeyedLocks::new();
        let held = locks.lock(1u32).await;
        let other = locks.lock(2u32).await;
        assert_eq!(locks.len(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(10), locks.lock(1)).await;
        assert!(blocked.is_err());
        drop(held);
        drop(other);
        assert_eq!(locks.len(), 0);
    }
}
