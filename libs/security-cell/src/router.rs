// =====================================================================================
// SECURITY CELL ROUTER
// =====================================================================================

use std::sync::Arc;

use axum::{middleware, routing::post, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{record_attempt, SecurityHandlers};
use crate::services::RateLimiter;

pub fn create_security_router(config: Arc<AppConfig>, limiter: Arc<RateLimiter>) -> Router {
    let handlers = Arc::new(SecurityHandlers::new(config.clone(), limiter));

    Router::new()
        .route("/rate-limit/{operation}", post(record_attempt))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(handlers)
}
