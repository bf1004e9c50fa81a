use crate::CacheConfig;
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::fmt::{Debug, Formatter};
use std::hash::Hash;
use std::sync::Arc;

/// Reports the size of a cached value. The unit must be consistent with the limits in
/// [CacheConfig].
pub trait CacheSize {
    /// Returns the size of the value.
    fn cache_size(&self) -> usize;
}

impl<T: CacheSize + ?Sized> CacheSize for Arc<T> {
    fn cache_size(&self) -> usize {
        self.as_ref().cache_size()
    }
}

struct LruEntry<V> {
    value: V,
    size: usize,
}

/// A size-bounded least-recently-used cache with support for pinned entries.
///
/// Non-pinned entries are kept in an unbounded [lru::LruCache]. The limits of [CacheConfig] are
/// enforced here by evicting the least recently used entries until a new value fits. Pinned
/// entries are never evicted. Their size counts against [CacheConfig::max_size], so they reduce
/// the space that is available for non-pinned entries.
pub struct LruCache<K, V> {
    config: CacheConfig,
    entries: lru::LruCache<K, LruEntry<V>, FxBuildHasher>,
    pinned: FxHashMap<K, (V, usize)>,
    non_pinned_size: usize,
    pinned_size: usize,
}

impl<K: Clone + Eq + Hash, V: Clone + CacheSize> LruCache<K, V> {
    /// Creates a new empty [LruCache].
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: lru::LruCache::unbounded_with_hasher(FxBuildHasher),
            pinned: FxHashMap::default(),
            non_pinned_size: 0,
            pinned_size: 0,
        }
    }

    /// Returns the limits of this cache.
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Returns the value for `key` and marks it as recently used.
    pub fn get(&mut self, key: &K) -> Option<(V, bool)> {
        if let Some((value, _)) = self.pinned.get(key) {
            return Some((value.clone(), true));
        }
        self.entries
            .get(key)
            .map(|entry| (entry.value.clone(), false))
    }

    /// Returns `true` if `key` is cached.
    pub fn contains(&self, key: &K) -> bool {
        self.pinned.contains_key(key) || self.entries.contains(key)
    }

    /// Returns `true` if `key` is cached and pinned.
    pub fn contains_pinned(&self, key: &K) -> bool {
        self.pinned.contains_key(key)
    }

    /// Inserts a non-pinned value. Evicts the least recently used entries until the value fits.
    ///
    /// Returns `false` if the value cannot be stored, either because it is larger than
    /// [CacheConfig::max_size_single_entry] or because the pinned entries occupy too much space.
    /// A value that is already pinned under `key` stays pinned.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.pinned.contains_key(&key) {
            return true;
        }
        self.remove_non_pinned(&key);

        let size = value.cache_size();
        if size > self.config.max_size_single_entry
            || self.pinned_size.saturating_add(size) > self.config.max_size
            || self.config.max_num_entries == 0
        {
            return false;
        }

        while self.entries.len() >= self.config.max_num_entries
            || self.pinned_size + self.non_pinned_size + size > self.config.max_size
        {
            let Some((_, evicted)) = self.entries.pop_lru() else {
                return false;
            };
            self.non_pinned_size -= evicted.size;
        }

        self.entries.put(key, LruEntry { value, size });
        self.non_pinned_size += size;
        true
    }

    /// Inserts a pinned value. Pinned values ignore all limits. An existing non-pinned entry for
    /// `key` is upgraded.
    pub fn insert_pinned(&mut self, key: K, value: V) {
        self.remove_non_pinned(&key);
        let size = value.cache_size();
        if let Some((_, old_size)) = self.pinned.insert(key, (value, size)) {
            self.pinned_size -= old_size;
        }
        self.pinned_size += size;
    }

    /// Removes all non-pinned entries.
    pub fn clear_unpinned(&mut self) {
        self.entries.clear();
        self.non_pinned_size = 0;
    }

    /// Removes all entries, including the pinned ones.
    pub fn clear_all(&mut self) {
        self.clear_unpinned();
        self.pinned.clear();
        self.pinned_size = 0;
    }

    /// Returns the number of non-pinned entries.
    pub fn num_non_pinned_entries(&self) -> usize {
        self.entries.len()
    }

    /// Returns the number of pinned entries.
    pub fn num_pinned_entries(&self) -> usize {
        self.pinned.len()
    }

    /// Returns the total size of all non-pinned entries.
    pub fn non_pinned_size(&self) -> usize {
        self.non_pinned_size
    }

    /// Returns the total size of all pinned entries.
    pub fn pinned_size(&self) -> usize {
        self.pinned_size
    }

    fn remove_non_pinned(&mut self, key: &K) {
        if let Some(entry) = self.entries.pop(key) {
            self.non_pinned_size -= entry.size;
        }
    }
}

impl<K, V> Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("config", &self.config)
            .field("num_pinned_entries", &self.pinned.len())
            .field("non_pinned_size", &self.non_pinned_size)
            .field("pinned_size", &self.pinned_size)
            .finish_non_exhaustive()
    }
}
