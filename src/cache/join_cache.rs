use crate::cache::lru::HitCountLru;
use crate::cache::CacheStats;
use crate::core::value::Value;
use crate::index::idset::IdSet;

/// Key of one memoized join probe: the subquery shape, the value bound
/// from the main row, and the joined namespace's version at probe time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinCacheKey {
    pub fingerprint: String,
    pub bound: Value,
    pub joined_version: u64,
}

#[derive(Debug)]
pub struct JoinCache {
    cache: HitCountLru<JoinCacheKey, IdSet>,
}

impl JoinCache {
    pub fn new(capacity: usize, hit_count_limit: u32) -> Self {
        JoinCache {
            cache: HitCountLru::new(capacity, hit_count_limit),
        }
    }

    pub fn get(&self, key: &JoinCacheKey) -> Option<IdSet> {
        self.cache.get(key)
    }

    pub fn put(&self, key: JoinCacheKey, ids: IdSet) {
        self.cache.put(key, ids);
    }

    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
