/// Limits of the query result cache.
///
/// Sizes are measured in table cells (see `CacheSize`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// The maximum number of non-pinned entries.
    pub max_num_entries: usize,
    /// The maximum total size of all non-pinned entries.
    pub max_size: usize,
    /// Results that are larger than this are returned to the caller but never cached.
    pub max_size_single_entry: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_num_entries: 1000,
            max_size: 1 << 30,
            max_size_single_entry: 1 << 28,
        }
    }
}

/// Configures the evaluation of operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// The number of rows per batch when leaves produce lazy results. Also the number of rows
    /// that are produced between two cancellation checks while writing join results.
    pub lazy_chunk_size: usize,
    /// If one join input is larger than the other by this factor, the galloping join is used
    /// instead of the zipper join.
    pub gallop_threshold: usize,
    /// Pins the result of the root operation in the cache.
    pub pin_result: bool,
    /// Pins the results of all operations in the cache.
    pub pin_subtrees: bool,
    /// The limits of the query result cache.
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lazy_chunk_size: 100_000,
            gallop_threshold: 1000,
            pin_result: false,
            pin_subtrees: false,
            cache: CacheConfig::default(),
        }
    }
}
