use crate::cache::lru::HitCountLru;
use crate::cache::CacheStats;
use crate::query::results::QueryResults;

/// Key of one cached select: the query's textual identity plus the
/// namespace version it ran against. A version bump changes every key, so
/// stale answers are unreachable by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey {
    pub fingerprint: String,
    pub version: u64,
}

#[derive(Debug)]
pub struct QueryCache {
    cache: HitCountLru<QueryCacheKey, QueryResults>,
}

impl QueryCache {
    pub fn new(capacity: usize, hit_count_limit: u32) -> Self {
        QueryCache {
            cache: HitCountLru::new(capacity, hit_count_limit),
        }
    }

    pub fn get(&self, fingerprint: &str, version: u64) -> Option<QueryResults> {
        self.cache.get(&QueryCacheKey {
            fingerprint: fingerprint.to_string(),
            version,
        })
    }

    pub fn put(&self, fingerprint: String, version: u64, results: QueryResults) {
        self.cache.put(
            QueryCacheKey {
                fingerprint,
                version,
            },
            results,
        );
    }

    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
