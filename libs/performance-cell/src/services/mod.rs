pub mod backend;
pub mod cache;
pub mod keys;
pub mod redis_backend;

pub use backend::{CacheBackend, InMemoryCacheBackend};
pub use cache::CacheService;
pub use keys::{CacheKeys, ListCacheKey};
pub use redis_backend::RedisCacheBackend;
