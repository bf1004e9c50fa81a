mod concurrent;
mod lru;

pub use concurrent::{CacheStatus, ConcurrentCache};
pub use lru::{CacheSize, LruCache};
