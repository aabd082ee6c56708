use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;

/// Per-namespace operation counters, updated without taking the write lock.
#[derive(Debug, Default)]
pub struct PerfCounters {
    pub selects: AtomicU64,
    pub inserts: AtomicU64,
    pub updates: AtomicU64,
    pub upserts: AtomicU64,
    pub deletes: AtomicU64,
    pub commits: AtomicU64,
}

impl PerfCounters {
    pub fn snapshot(&self) -> PerfStat {
        PerfStat {
            selects: self.selects.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfStat {
    pub selects: u64,
    pub inserts: u64,
    pub updates: u64,
    pub upserts: u64,
    pub deletes: u64,
    pub commits: u64,
}

/// Memory accounting for one index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMemStat {
    pub name: String,
    pub unique_keys: usize,
    pub ids_size_bytes: usize,
    pub data_size_bytes: usize,
}

/// Snapshot of a namespace for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceStat {
    pub name: String,
    pub items_count: usize,
    pub empty_slots: usize,
    pub data_size_bytes: usize,
    pub version: u64,
    pub indexes: Vec<IndexMemStat>,
    pub query_cache: CacheStats,
    pub join_cache: CacheStats,
    pub perf: PerfStat,
}
