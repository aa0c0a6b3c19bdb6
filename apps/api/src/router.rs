use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::json;

use appointment_cell::{appointment_routes, AppointmentState};
use performance_cell::{create_performance_router, CacheService};
use schedule_cell::{schedule_routes, ScheduleQuotaManager};
use security_cell::{create_security_router, RateLimiter};
use shared_config::AppConfig;

/// Long-lived services shared by every cell router.
#[derive(Clone)]
pub struct AppComponents {
    pub cache: Arc<CacheService>,
    pub quota: Arc<ScheduleQuotaManager>,
    pub appointments: AppointmentState,
    pub limiter: Arc<RateLimiter>,
}

pub fn create_router(config: Arc<AppConfig>, components: AppComponents) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic quota API is running!" }))
        .route("/health", get(health))
        .nest("/schedules", schedule_routes(config.clone(), components.quota))
        .nest(
            "/appointments",
            appointment_routes(config.clone(), components.appointments, components.limiter.clone()),
        )
        .nest("/performance", create_performance_router(config.clone(), components.cache))
        .nest("/security", create_security_router(config, components.limiter))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
