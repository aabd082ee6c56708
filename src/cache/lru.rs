use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::cache::CacheStats;

/// Cache slot: requests are counted in a placeholder until the entry has
/// earned admission, so one-shot queries never evict hot entries.
#[derive(Debug)]
enum Slot<V> {
    Placeholder(u32),
    Ready(V),
}

/// LRU cache with a hit-count admission threshold. Reads and writes go
/// through a short internal mutex, so lookups work under a shared
/// namespace lock.
#[derive(Debug)]
pub struct HitCountLru<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, Slot<V>>>,
    hit_count_limit: u32,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<K: Hash + Eq, V: Clone> HitCountLru<K, V> {
    pub fn new(capacity: usize, hit_count_limit: u32) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity is non-zero");
        HitCountLru {
            inner: Mutex::new(LruCache::new(cap)),
            hit_count_limit,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Fetch a ready value. A miss registers interest: once a key has been
    /// asked for `hit_count_limit` times, `put` will actually store it.
    pub fn get(&self, key: &K) -> Option<V>
    where
        K: Clone,
    {
        let mut cache = self.inner.lock();
        match cache.get_mut(key) {
            Some(Slot::Ready(v)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            Some(Slot::Placeholder(n)) => {
                *n += 1;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                cache.put(key.clone(), Slot::Placeholder(1));
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a computed value if the key has earned admission.
    pub fn put(&self, key: K, value: V) {
        let mut cache = self.inner.lock();
        let admitted = match cache.peek(&key) {
            Some(Slot::Placeholder(n)) => *n >= self.hit_count_limit,
            Some(Slot::Ready(_)) => true,
            None => self.hit_count_limit == 0,
        };
        if admitted {
            cache.put(key, Slot::Ready(value));
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.inner.lock();
        let mut items = 0;
        let mut empty = 0;
        for (_, slot) in cache.iter() {
            match slot {
                Slot::Ready(_) => items += 1,
                Slot::Placeholder(_) => empty += 1,
            }
        }
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            items,
            empty,
            capacity: cache.cap().get(),
            hit_count_limit: self.hit_count_limit,
        }
    }
}
