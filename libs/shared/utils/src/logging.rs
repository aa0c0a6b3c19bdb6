use std::time::Instant;

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};

use shared_models::auth::User;

/// Times a request and records who made it. Composed with
/// `middleware::from_fn` around the booking and auth-guarded routes.
pub async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user_id = request.extensions().get::<User>().map(|u| u.id.clone());
    let started = Instant::now();

    let response = next.run(request).await;

    let elapsed_ms = started.elapsed().as_millis();
    let status = response.status();
    let user = user_id.as_deref().unwrap_or("anonymous");

    if status.is_server_error() {
        warn!(%method, %path, status = status.as_u16(), elapsed_ms, user, "request failed");
    } else {
        info!(%method, %path, status = status.as_u16(), elapsed_ms, user, "request handled");
    }

    response
}
