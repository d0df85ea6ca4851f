//! Bounded least-recently-used cache shared between threads.
//!
//! A thin `Mutex` wrapper around [`lru::LruCache`] that hands out clones, so
//! the lock is never held while a caller uses a value. Values are expected to
//! be cheap to clone (usually an `Arc`).

use std::hash::Hash;
use std::num::NonZeroUsize;

use parking_lot::Mutex;

#[derive(Debug)]
pub struct LruCache<K: Hash + Eq, V> {
    inner: Mutex<lru::LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> LruCache<K, V> {
    /// A cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        LruCache { inner: Mutex::new(lru::LruCache::new(capacity)) }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }
}
