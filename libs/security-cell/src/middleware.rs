use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::info;

use shared_config::RateLimitRule;
use shared_models::{auth::User, error::AppError};
use shared_utils::extractor::client_ip;

use crate::models::{KeyScope, RateLimitError, RateLimitKey, RateLimitedOperation};
use crate::services::RateLimiter;

const UNKNOWN_CLIENT: &str = "unknown";

/// State for one guarded route group; composed with
/// `middleware::from_fn_with_state(state, rate_limit_middleware)`.
#[derive(Clone)]
pub struct RateLimitLayerState {
    pub limiter: Arc<RateLimiter>,
    pub operation: RateLimitedOperation,
    pub rule: RateLimitRule,
    pub scope: KeyScope,
    pub trust_proxy_headers: bool,
}

impl RateLimitLayerState {
    pub fn new(limiter: Arc<RateLimiter>, operation: RateLimitedOperation, rule: RateLimitRule, scope: KeyScope) -> Self {
        Self {
            limiter,
            operation,
            rule,
            scope,
            trust_proxy_headers: false,
        }
    }

    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub fn keys_for<B>(&self, request: &Request<B>) -> Vec<RateLimitKey> {
        limiter_keys(self.operation, self.scope, self.trust_proxy_headers, request)
    }
}

/// Counters a request is charged against. `IpAndUser` yields two independent
/// counters so changing either attribute alone never opens a fresh window.
/// The per-IP counter is skipped for signed-in users whose address is unknown,
/// since every such request would otherwise share one bucket.
pub fn limiter_keys<B>(
    operation: RateLimitedOperation,
    scope: KeyScope,
    trust_proxy_headers: bool,
    request: &Request<B>,
) -> Vec<RateLimitKey> {
    let ip = client_ip(request, trust_proxy_headers);
    let user_id = request.extensions().get::<User>().map(|u| u.id.clone());
    let key = || RateLimitKey::new(operation.as_str());

    match (scope, user_id, ip) {
        (KeyScope::User, Some(user_id), _) | (KeyScope::IpAndUser, Some(user_id), None) => {
            vec![key().user(user_id)]
        }
        (KeyScope::IpAndUser, Some(user_id), Some(ip)) => vec![key().user(user_id), key().ip(ip)],
        (_, _, ip) => vec![key().ip(ip.unwrap_or_else(|| UNKNOWN_CLIENT.to_string()))],
    }
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitLayerState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    for key in state.keys_for(&request) {
        state
            .limiter
            .check(&key, state.rule)
            .await
            .map_err(|e| into_app_error(&key, e))?;
    }

    Ok(next.run(request).await)
}

pub fn into_app_error(key: &RateLimitKey, error: RateLimitError) -> AppError {
    match error {
        RateLimitError::TooManyRequests { operation, retry_after_secs, .. } => {
            info!("Rejected {} request for {}", operation, key.counter_key());
            AppError::TooManyRequests {
                message: format!("Too many {} requests, retry in {} seconds", operation, retry_after_secs),
                retry_after_secs,
            }
        }
        RateLimitError::Backend(e) => AppError::ServiceUnavailable(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use axum::{extract::ConnectInfo, http::StatusCode, routing::post, Router};
    use performance_cell::InMemoryCacheBackend;
    use shared_utils::test_utils::TestUser;
    use tower::ServiceExt;

    fn state(scope: KeyScope) -> RateLimitLayerState {
        let limiter = Arc::new(RateLimiter::new(Arc::new(InMemoryCacheBackend::new())));
        RateLimitLayerState::new(limiter, RateLimitedOperation::Booking, RateLimitRule::new(3, 60), scope)
    }

    fn counter_keys(keys: Vec<RateLimitKey>) -> Vec<String> {
        keys.iter().map(RateLimitKey::counter_key).collect()
    }

    fn booking_request(user: &User, forwarded_for: &str, peer: [u8; 4]) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(user.clone());
        request.extensions_mut().insert(ConnectInfo(SocketAddr::from((peer, 40000))));
        request
    }

    fn guarded(state: RateLimitLayerState) -> Router {
        Router::new()
            .route("/", post(|| async { "booked" }))
            .layer(axum::middleware::from_fn_with_state(state, rate_limit_middleware))
    }

    #[test]
    fn key_scope_selects_request_attributes() {
        let user = TestUser::patient("p@example.com").to_user();
        let request = booking_request(&user, "198.51.100.1", [192, 0, 2, 10]);

        assert_eq!(counter_keys(state(KeyScope::Ip).keys_for(&request)), vec!["rate_limit:booking:ip:192.0.2.10"]);
        assert_eq!(
            counter_keys(state(KeyScope::User).keys_for(&request)),
            vec![format!("rate_limit:booking:user:{}", user.id)]
        );
        assert_eq!(
            counter_keys(state(KeyScope::IpAndUser).keys_for(&request)),
            vec![format!("rate_limit:booking:user:{}", user.id), "rate_limit:booking:ip:192.0.2.10".to_string()]
        );
        assert_eq!(
            counter_keys(state(KeyScope::Ip).trust_proxy_headers(true).keys_for(&request)),
            vec!["rate_limit:booking:ip:198.51.100.1"]
        );
    }

    #[test]
    fn anonymous_user_scope_falls_back_to_ip() {
        let request = Request::builder().body(()).unwrap();
        assert_eq!(counter_keys(state(KeyScope::User).keys_for(&request)), vec!["rate_limit:booking:ip:unknown"]);
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_reset_the_user_window() {
        let app = guarded(state(KeyScope::IpAndUser));
        let user = TestUser::patient("p@example.com").to_user();

        let mut allowed = 0;
        for i in 0..20u8 {
            let request = booking_request(&user, &format!("10.0.0.{}", i), [192, 0, 2, i]);
            if app.clone().oneshot(request).await.unwrap().status() == StatusCode::OK {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }

    #[tokio::test]
    async fn shared_address_is_limited_across_users() {
        let app = guarded(state(KeyScope::IpAndUser));

        for n in 0..3 {
            let user = TestUser::patient(&format!("p{}@example.com", n)).to_user();
            let response = app.clone().oneshot(booking_request(&user, "10.0.0.1", [192, 0, 2, 20])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let fourth = TestUser::patient("p4@example.com").to_user();
        let response = app.oneshot(booking_request(&fourth, "10.0.0.99", [192, 0, 2, 20])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
