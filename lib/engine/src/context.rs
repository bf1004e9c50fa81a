use crate::result::QueryResult;
use sparql_exec_common::{
    CancellationHandle, ConcurrentCache, EngineConfig, SharedCancellationHandle,
};
use std::sync::Arc;

/// The cache that holds the results of operations, keyed by their cache key.
pub type QueryResultCache = ConcurrentCache<String, Arc<QueryResult>>;

/// Everything an operation needs to evaluate itself.
///
/// The cache is usually shared between all queries, while the cancellation handle belongs to a
/// single query.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    cache: Arc<QueryResultCache>,
    cancellation: SharedCancellationHandle,
    config: EngineConfig,
}

impl ExecutionContext {
    /// Creates a new [ExecutionContext].
    pub fn new(
        cache: Arc<QueryResultCache>,
        cancellation: SharedCancellationHandle,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache,
            cancellation,
            config,
        }
    }

    /// Creates a new [ExecutionContext] with a fresh cache that is configured by `config`.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::new(
            Arc::new(QueryResultCache::new(config.cache)),
            CancellationHandle::new_shared(),
            config,
        )
    }

    /// Creates a context for another query that shares the cache of this context.
    #[must_use]
    pub fn for_new_query(&self) -> Self {
        Self::new(
            Arc::clone(&self.cache),
            CancellationHandle::new_shared(),
            self.config,
        )
    }

    /// Returns the query result cache.
    pub fn cache(&self) -> &Arc<QueryResultCache> {
        &self.cache
    }

    /// Returns the cancellation handle of the query.
    pub fn cancellation(&self) -> &SharedCancellationHandle {
        &self.cancellation
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::with_config(EngineConfig::default())
    }
}
