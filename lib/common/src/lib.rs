mod cache;
mod cancellation;
mod config;
pub mod error;

pub use cache::{CacheSize, CacheStatus, ConcurrentCache, LruCache};
pub use cancellation::{
    CancellationError, CancellationHandle, CancellationState, SharedCancellationHandle,
};
pub use config::{CacheConfig, EngineConfig};
pub use error::{ExecutionError, ExecutionResult};
