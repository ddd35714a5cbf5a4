//! A named mutex with keyed multi-acquire semantics (§4.11).
//!
//! `lock(keys, fn)` enqueues `fn` until no currently held key set intersects
//! `keys`. Acquisition and release are expressed as a guard whose `Drop`
//! fires on every exit path — success, panic-unwind, or early return — so a
//! critical section can never leak a held key.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::Notify;

/// Keyed mutex: many independent keys, each held by at most one task at a
/// time, with multi-key atomic acquisition (all-or-nothing).
pub struct KeyedMutex<K: Eq + Hash + Clone + Send + Sync + 'static> {
    held: DashSet<K>,
    notify: Notify,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self {
            held: DashSet::new(),
            notify: Notify::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> KeyedMutex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every key in `keys` atomically, run `f`, then release all of
    /// them unconditionally (even if `f` panics, thanks to the guard's Drop).
    pub async fn lock<F, Fut, R>(self: &Arc<Self>, keys: Vec<K>, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        let _guard = self.acquire(keys).await;
        f().await
    }

    /// Acquire every key in `keys`, returning a guard that releases them on drop.
    pub async fn acquire(self: &Arc<Self>, keys: Vec<K>) -> KeyedGuard<K> {
        let unique: HashSet<K> = keys.into_iter().collect();
        loop {
            if self.try_insert_all(&unique) {
                return KeyedGuard {
                    mutex: Arc::clone(self),
                    keys: unique,
                };
            }
            self.notify.notified().await;
        }
    }

    fn try_insert_all(&self, keys: &HashSet<K>) -> bool {
        for k in keys {
            if self.held.contains(k) {
                return false;
            }
        }
        for k in keys {
            self.held.insert(k.clone());
        }
        true
    }

    fn release(&self, keys: &HashSet<K>) {
        for k in keys {
            self.held.remove(k);
        }
        self.notify.notify_waiters();
    }
}

/// RAII guard releasing a keyed-mutex acquisition on drop, on every exit path.
pub struct KeyedGuard<K: Eq + Hash + Clone + Send + Sync + 'static> {
    mutex: Arc<KeyedMutex<K>>,
    keys: HashSet<K>,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        self.mutex.release(&self.keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disjoint_keys_run_concurrently() {
        let m: Arc<KeyedMutex<&'static str>> = Arc::new(KeyedMutex::new());
        let g1 = m.acquire(vec!["a"]).await;
        let g2 = m.acquire(vec!["b"]).await;
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn overlapping_keys_serialize() {
        let m: Arc<KeyedMutex<&'static str>> = Arc::new(KeyedMutex::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let g1 = m.acquire(vec!["x"]).await;
        let m2 = Arc::clone(&m);
        let order2 = Arc::clone(&order);
        let handle = tokio::spawn(async move {
            let _g = m2.acquire(vec!["x"]).await;
            order2.lock().await.push(2);
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        order.lock().await.push(1);
        drop(g1);
        handle.await.unwrap();

        assert_eq!(*order.lock().await, vec![1, 2]);
    }
}
