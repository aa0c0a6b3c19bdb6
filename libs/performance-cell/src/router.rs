use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::get_cache_stats;
use crate::services::CacheService;

pub fn create_performance_router(config: Arc<AppConfig>, cache: Arc<CacheService>) -> Router {
    Router::new()
        .route("/cache/stats", get(get_cache_stats))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(cache)
}
