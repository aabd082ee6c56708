use std::path::PathBuf;

use crate::storage::wal::SyncMode;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for persistent namespaces. `None` keeps everything in memory.
    pub storage_path: Option<PathBuf>,

    pub query_cache_items: usize,
    pub join_cache_items: usize,
    /// Entries must be requested this many times before a cache stores them.
    pub cache_hit_threshold: u32,

    pub wal_sync_mode: SyncMode,

    /// Cap on distinct facet buckets kept per aggregation.
    pub max_facet_buckets: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: None,
            query_cache_items: 1024,
            join_cache_items: 4096,
            cache_hit_threshold: 2,
            wal_sync_mode: SyncMode::Batch,
            max_facet_buckets: 1000,
        }
    }
}
