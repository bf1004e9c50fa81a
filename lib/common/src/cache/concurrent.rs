use crate::cache::lru::{CacheSize, LruCache};
use crate::{CacheConfig, ExecutionError, ExecutionResult};
use rustc_hash::FxHashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Describes where the value returned by [ConcurrentCache::compute_once] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// The value was computed by this call.
    Computed,
    /// The value was already cached (or computed by a concurrent call) and is not pinned.
    CachedNotPinned,
    /// The value was already cached (or computed by a concurrent call) and is pinned.
    CachedPinned,
}

impl CacheStatus {
    /// Returns `true` if the value was not computed by the caller.
    pub fn is_cached(self) -> bool {
        !matches!(self, CacheStatus::Computed)
    }
}

#[derive(Debug)]
enum InProgressState<V> {
    Pending,
    Ready(V),
    Aborted(String),
}

/// A computation that is currently running. Concurrent callers for the same key wait on it.
#[derive(Debug)]
struct ResultInProgress<V> {
    state: Mutex<InProgressState<V>>,
    finished: Condvar,
}

impl<V: Clone> ResultInProgress<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(InProgressState::Pending),
            finished: Condvar::new(),
        }
    }

    fn finish(&self, state: InProgressState<V>) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = state;
        self.finished.notify_all();
    }

    /// Blocks until the computation is finished.
    fn wait(&self, key: &impl Display) -> ExecutionResult<V> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &*guard {
                InProgressState::Pending => {
                    guard = self
                        .finished
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                InProgressState::Ready(value) => return Ok(value.clone()),
                InProgressState::Aborted(cause) => {
                    return Err(ExecutionError::ComputationAborted {
                        key: key.to_string(),
                        cause: cause.clone(),
                    })
                }
            }
        }
    }
}

#[derive(Debug)]
struct InProgressEntry<V> {
    result: Arc<ResultInProgress<V>>,
    /// Set if any caller asked for the result to be pinned.
    pinned: bool,
    /// The number of callers that wait for the result.
    num_waiting: usize,
}

#[derive(Debug)]
struct CacheState<K, V> {
    cache: LruCache<K, V>,
    in_progress: FxHashMap<K, InProgressEntry<V>>,
}

/// What a call to [ConcurrentCache::compute_once] has to do after releasing the lock.
enum Role<V> {
    Cached(V, CacheStatus),
    Wait(Arc<ResultInProgress<V>>),
    Compute(Arc<ResultInProgress<V>>),
}

/// A thread-safe cache that computes the value for each key at most once at a time
/// (single-flight).
///
/// The first caller for a key computes the value without holding any lock. Concurrent callers for
/// the same key block until the computation finishes and share its result. If the computation
/// fails, the entry is removed and all waiting callers fail with
/// [ExecutionError::ComputationAborted]. Callers that arrive later start a new computation.
#[derive(Debug)]
pub struct ConcurrentCache<K, V> {
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> ConcurrentCache<K, V>
where
    K: Clone + Eq + Hash + Display,
    V: Clone + CacheSize,
{
    /// Creates a new empty [ConcurrentCache].
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                cache: LruCache::new(config),
                in_progress: FxHashMap::default(),
            }),
        }
    }

    /// Returns the value for `key`, computing it with `compute` if it is neither cached nor
    /// currently being computed.
    pub fn compute_once(
        &self,
        key: &K,
        compute: impl FnOnce() -> ExecutionResult<V>,
    ) -> ExecutionResult<(V, CacheStatus)> {
        self.compute_once_impl(key, compute, false)
    }

    /// Like [Self::compute_once], but the value is pinned in the cache. If the value is already
    /// cached or currently being computed, it becomes pinned.
    pub fn compute_once_pinned(
        &self,
        key: &K,
        compute: impl FnOnce() -> ExecutionResult<V>,
    ) -> ExecutionResult<(V, CacheStatus)> {
        self.compute_once_impl(key, compute, true)
    }

    fn compute_once_impl(
        &self,
        key: &K,
        compute: impl FnOnce() -> ExecutionResult<V>,
        pin: bool,
    ) -> ExecutionResult<(V, CacheStatus)> {
        match self.acquire_role(key, pin) {
            Role::Cached(value, status) => Ok((value, status)),
            Role::Wait(in_progress) => {
                let value = in_progress.wait(key)?;
                let status = if self.lock().cache.contains_pinned(key) {
                    CacheStatus::CachedPinned
                } else {
                    CacheStatus::CachedNotPinned
                };
                Ok((value, status))
            }
            Role::Compute(in_progress) => {
                let guard = ComputationGuard {
                    cache: self,
                    key,
                    in_progress,
                    finished: false,
                };
                match compute() {
                    Ok(value) => {
                        guard.succeed(value.clone());
                        Ok((value, CacheStatus::Computed))
                    }
                    Err(error) => {
                        guard.abort(error.to_string());
                        Err(error)
                    }
                }
            }
        }
    }

    fn acquire_role(&self, key: &K, pin: bool) -> Role<V> {
        let mut state = self.lock();
        if let Some((value, pinned)) = state.cache.get(key) {
            if pin && !pinned {
                state.cache.insert_pinned(key.clone(), value.clone());
                return Role::Cached(value, CacheStatus::CachedPinned);
            }
            let status = if pinned {
                CacheStatus::CachedPinned
            } else {
                CacheStatus::CachedNotPinned
            };
            return Role::Cached(value, status);
        }

        if let Some(entry) = state.in_progress.get_mut(key) {
            entry.pinned |= pin;
            entry.num_waiting += 1;
            return Role::Wait(Arc::clone(&entry.result));
        }

        let result = Arc::new(ResultInProgress::new());
        state.in_progress.insert(
            key.clone(),
            InProgressEntry {
                result: Arc::clone(&result),
                pinned: pin,
                num_waiting: 0,
            },
        );
        Role::Compute(result)
    }

    /// Returns the cached value for `key` without waiting for running computations.
    pub fn get_if_contained(&self, key: &K) -> Option<(V, CacheStatus)> {
        let (value, pinned) = self.lock().cache.get(key)?;
        let status = if pinned {
            CacheStatus::CachedPinned
        } else {
            CacheStatus::CachedNotPinned
        };
        Some((value, status))
    }

    /// Returns `true` if a value for `key` is cached. Running computations are not considered.
    pub fn contains(&self, key: &K) -> bool {
        self.lock().cache.contains(key)
    }

    /// Returns `true` if a computation for `key` is currently running.
    pub fn is_in_progress(&self, key: &K) -> bool {
        self.lock().in_progress.contains_key(key)
    }

    /// Returns the number of callers that wait for the running computation for `key`. Returns 0
    /// if no computation for `key` is running.
    pub fn num_waiting(&self, key: &K) -> usize {
        self.lock()
            .in_progress
            .get(key)
            .map_or(0, |entry| entry.num_waiting)
    }

    /// Inserts a value that was computed outside of [Self::compute_once]. Does nothing if the
    /// key is already cached or currently being computed.
    ///
    /// Returns `true` if the value was inserted.
    pub fn try_insert(&self, key: K, value: V, pinned: bool) -> bool {
        let mut state = self.lock();
        if state.cache.contains(&key) || state.in_progress.contains_key(&key) {
            return false;
        }
        if pinned {
            state.cache.insert_pinned(key, value);
            true
        } else {
            state.cache.insert(key, value)
        }
    }

    /// Removes all non-pinned values.
    pub fn clear_unpinned(&self) {
        self.lock().cache.clear_unpinned();
    }

    /// Removes all values, including the pinned ones. Running computations are not affected.
    pub fn clear_all(&self) {
        self.lock().cache.clear_all();
    }

    /// Returns the number of non-pinned entries.
    pub fn num_non_pinned_entries(&self) -> usize {
        self.lock().cache.num_non_pinned_entries()
    }

    /// Returns the number of pinned entries.
    pub fn num_pinned_entries(&self) -> usize {
        self.lock().cache.num_pinned_entries()
    }

    /// Returns the total size of all non-pinned entries.
    pub fn non_pinned_size(&self) -> usize {
        self.lock().cache.non_pinned_size()
    }

    /// Returns the total size of all pinned entries.
    pub fn pinned_size(&self) -> usize {
        self.lock().cache.pinned_size()
    }

    /// Returns the limits of the underlying LRU cache.
    pub fn config(&self) -> CacheConfig {
        self.lock().cache.config()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns a pending entry while its value is computed. Aborts the entry if the computation unwinds.
struct ComputationGuard<'cache, K, V>
where
    K: Clone + Eq + Hash + Display,
    V: Clone + CacheSize,
{
    cache: &'cache ConcurrentCache<K, V>,
    key: &'cache K,
    in_progress: Arc<ResultInProgress<V>>,
    finished: bool,
}

impl<K, V> ComputationGuard<'_, K, V>
where
    K: Clone + Eq + Hash + Display,
    V: Clone + CacheSize,
{
    fn succeed(mut self, value: V) {
        {
            let mut state = self.cache.lock();
            let pinned = state
                .in_progress
                .remove(self.key)
                .is_some_and(|entry| entry.pinned);
            if pinned {
                state.cache.insert_pinned(self.key.clone(), value.clone());
            } else if !state.cache.insert(self.key.clone(), value.clone()) {
                tracing::debug!("Result for {} is too large to be cached", self.key);
            }
        }
        self.in_progress.finish(InProgressState::Ready(value));
        self.finished = true;
    }

    fn abort(mut self, cause: String) {
        self.abort_impl(cause);
    }

    fn abort_impl(&mut self, cause: String) {
        let num_waiting = self
            .cache
            .lock()
            .in_progress
            .remove(self.key)
            .map_or(0, |entry| entry.num_waiting);
        tracing::debug!(
            "Computation for {} aborted with {num_waiting} waiting callers: {cause}",
            self.key
        );
        self.in_progress.finish(InProgressState::Aborted(cause));
        self.finished = true;
    }
}

impl<K, V> Drop for ComputationGuard<'_, K, V>
where
    K: Clone + Eq + Hash + Display,
    V: Clone + CacheSize,
{
    fn drop(&mut self) {
        if !self.finished {
            self.abort_impl("The computation panicked".to_owned());
        }
    }
}
