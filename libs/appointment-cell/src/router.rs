use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use security_cell::{rate_limit_middleware, KeyScope, RateLimitLayerState, RateLimitedOperation, RateLimiter};
use shared_config::AppConfig;
use shared_utils::{extractor::auth_middleware, logging::request_logging_middleware};

use crate::handlers;
use crate::services::{AppointmentQueryService, AppointmentStateMachine, NoShowReclaimer};

#[derive(Clone)]
pub struct AppointmentState {
    pub machine: Arc<AppointmentStateMachine>,
    pub queries: Arc<AppointmentQueryService>,
    pub reclaimer: Arc<NoShowReclaimer>,
}

pub fn appointment_routes(
    config: Arc<AppConfig>,
    state: AppointmentState,
    limiter: Arc<RateLimiter>,
) -> Router {
    let booking_limit = RateLimitLayerState::new(
        limiter,
        RateLimitedOperation::Booking,
        config.rate_limits.booking_create,
        KeyScope::IpAndUser,
    )
    .trust_proxy_headers(config.rate_limits.trust_proxy_headers);

    // Booking creation is charged to the caller's user and address windows;
    // auth runs first so the limiter sees the user.
    let booking_routes = Router::new()
        .route("/", post(handlers::book_appointment))
        .layer(middleware::from_fn_with_state(booking_limit, rate_limit_middleware));

    let lifecycle_routes = Router::new()
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/confirm-payment", post(handlers::confirm_payment))
        .route("/{appointment_id}/start", post(handlers::start_appointment))
        .route("/{appointment_id}/complete", post(handlers::complete_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/no-show", post(handlers::mark_no_show));

    let view_routes = Router::new()
        .route("/admin", get(handlers::admin_list_appointments))
        .route("/admin/no-show-sweep", post(handlers::run_no_show_sweep))
        .route("/doctors/{doctor_id}/patients", get(handlers::doctor_patient_list))
        .route("/doctors/{doctor_id}/today-stats", get(handlers::doctor_today_stats))
        .route("/patients/{patient_id}", get(handlers::patient_appointments))
        .route("/patients/{patient_id}/recent-stats", get(handlers::patient_recent_stats));

    Router::new()
        .merge(booking_routes)
        .merge(lifecycle_routes)
        .merge(view_routes)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(state)
}
