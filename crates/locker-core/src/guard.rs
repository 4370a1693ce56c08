use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A sharded map of per-key async mutexes (§5 — "ad-hoc mutex maps keyed by
/// locker id... the right shape... must be preserved").
///
/// Shared by the State Manager (serializing transitions per locker, §4.2) and
/// the Kiosk Executor (serializing hardware pulses per locker, §5) — each
/// holds its own `GuardMap` instance since the two serialize different
/// critical sections.
pub struct GuardMap<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> Default for GuardMap<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> GuardMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("guard map mutex poisoned");
        locks.entry(key.clone()).or_default().clone()
    }

    /// Acquire the guard for `key`, blocking other callers on the same key
    /// until the returned guard is dropped. Released on every exit path,
    /// including cancellation, since it's an RAII guard.
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_on_same_key_waits_for_first_to_drop() {
        let guards = Arc::new(GuardMap::<u32>::new());
        let first = guards.acquire(&1).await;

        let guards_clone = guards.clone();
        let waiter = tokio::spawn(async move {
            let _second = guards_clone.acquire(&1).await;
        });

        // The waiter cannot have finished yet — it's blocked behind `first`.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let guards: GuardMap<u32> = GuardMap::new();
        let g1 = guards.acquire(&1).await;
        let g2 = guards.acquire(&2).await;
        drop(g1);
        drop(g2);
    }
}
