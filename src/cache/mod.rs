pub mod join_cache;
pub mod lru;
pub mod query_cache;

use serde::{Deserialize, Serialize};

pub use join_cache::{JoinCache, JoinCacheKey};
pub use lru::HitCountLru;
pub use query_cache::QueryCache;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Entries holding a computed value.
    pub items: usize,
    /// Placeholder entries still counting requests toward admission.
    pub empty: usize,
    pub capacity: usize,
    pub hit_count_limit: u32,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
