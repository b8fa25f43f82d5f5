use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::ConsentKey;

/// Serializes check-then-act sequences per `(patient, provider)` key.
///
/// One async mutex per key, created on first use and dropped again once the
/// last guard for that key is released.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<ConsentKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &ConsentKey) -> KeyGuard {
        // Clone under the shard lock so pruning can't race the clone.
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;

        KeyGuard {
            key: key.clone(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of keys with a live mutex.
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }
}

pub struct KeyGuard {
    key: ConsentKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<ConsentKey, Arc<Mutex<()>>>>,
}

impl KeyGuard {
    pub fn key(&self) -> &ConsentKey {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release our Arc first; a count of one then means only the map holds it.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let key = ConsentKey::new("P1", "DOC1");

        let held = locks.acquire(&key).await;

        let locks2 = locks.clone();
        let key2 = key.clone();
        let waiter = tokio::spawn(async move {
            tokio::time::timeout(Duration::from_millis(50), locks2.acquire(&key2))
                .await
                .is_ok()
        });
        assert!(!waiter.await.unwrap(), "second acquire must wait while the key is held");

        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&key)).await;
        assert!(again.is_ok(), "lock must be free after release");
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire(&ConsentKey::new("P1", "DOC1")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(&ConsentKey::new("P1", "DOC2")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_entries_pruned_after_release() {
        let locks = KeyedLocks::new();
        {
            let _g = locks.acquire(&ConsentKey::new("P1", "DOC1")).await;
            assert_eq!(locks.active_keys(), 1);
        }
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_critical_section_never_overlaps() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let locks = locks.clone();
            let inside = inside.clone();
            let overlaps = overlaps.clone();
            handles.push(tokio::spawn(async move {
                let _g = locks.acquire(&ConsentKey::new("P1", "DOC1")).await;
                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(locks.active_keys(), 0);
    }
}
