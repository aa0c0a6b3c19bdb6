use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::ScheduleQuotaManager;

pub fn schedule_routes(config: Arc<AppConfig>, manager: Arc<ScheduleQuotaManager>) -> Router {
    // Browsing published schedules needs no account
    let public_routes = Router::new()
        .route("/{schedule_id}", get(handlers::get_schedule))
        .route("/doctors/{doctor_id}", get(handlers::list_doctor_schedules));

    let protected_routes = Router::new()
        .route("/", post(handlers::publish_schedule))
        .route("/{schedule_id}/close", post(handlers::close_schedule))
        .route("/{schedule_id}/reopen", post(handlers::reopen_schedule))
        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(manager)
}
