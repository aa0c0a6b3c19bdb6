// =====================================================================================
// PERFORMANCE CELL - READ CACHES & INVALIDATION
// =====================================================================================
//
// Caches here are projections, never the source of truth. Every entry can be
// recomputed from storage; TTLs only backstop a missed invalidation.
//
// =====================================================================================

pub mod models;
pub mod handlers;
pub mod router;
pub mod services;

pub use models::*;
pub use services::{CacheBackend, CacheKeys, CacheService, InMemoryCacheBackend, ListCacheKey, RedisCacheBackend};
pub use router::create_performance_router;
