//! Engine counters

/// Activity of one open cache plus the state of its journal
///
/// Counters start at zero on every open and are not persisted. Read them
/// with [`DiskLruCache::stats`](crate::DiskLruCache::stats), which copies
/// them out under the cache lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that produced a snapshot
    pub hits: u64,
    /// Lookups that found no readable entry, or whose value files were gone
    pub misses: u64,
    /// Edits published by a successful commit
    pub commits: u64,
    /// Edits rolled back by abort, drop, close or a failed commit
    pub aborts: u64,
    /// Entries removed to get back under the byte budget
    pub evictions: u64,
    /// Journal rewrites triggered by redundancy or by `compact`
    pub compactions: u64,
    /// Journal records beyond one per live entry
    pub redundant_records: u64,
}
