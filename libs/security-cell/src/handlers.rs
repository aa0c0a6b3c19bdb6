use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::Request,
    Extension, Json,
};
use serde_json::{json, Value};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::{auth::User, error::AppError};

use crate::middleware::{into_app_error, limiter_keys};
use crate::models::{KeyScope, RateLimitDecision, RateLimitedOperation};
use crate::services::RateLimiter;

pub struct SecurityHandlers {
    pub config: Arc<AppConfig>,
    pub limiter: Arc<RateLimiter>,
}

impl SecurityHandlers {
    pub fn new(config: Arc<AppConfig>, limiter: Arc<RateLimiter>) -> Self {
        Self { config, limiter }
    }
}

/// Records one attempt of a limited operation on behalf of an external
/// endpoint (login, search recording) and reports whether it may proceed.
/// The caller's user and address windows are both charged; the tighter one is reported.
pub async fn record_attempt(
    State(handlers): State<Arc<SecurityHandlers>>,
    Extension(user): Extension<User>,
    Path(operation): Path<String>,
    request: Request<Body>,
) -> Result<Json<Value>, AppError> {
    let operation = RateLimitedOperation::parse(&operation)
        .ok_or_else(|| AppError::NotFound(format!("Unknown rate limited operation: {}", operation)))?;

    let rule = operation.rule(&handlers.config.rate_limits);
    let keys = limiter_keys(
        operation,
        KeyScope::IpAndUser,
        handlers.config.rate_limits.trust_proxy_headers,
        &request,
    );

    let mut tightest: Option<RateLimitDecision> = None;
    for key in &keys {
        let decision = handlers
            .limiter
            .check(key, rule)
            .await
            .map_err(|e| into_app_error(key, e))?;

        if tightest.as_ref().map_or(true, |t| decision.remaining() < t.remaining()) {
            tightest = Some(decision);
        }
    }

    let decision = tightest
        .ok_or_else(|| AppError::Internal(format!("No limiter key for {} attempt", operation)))?;

    debug!("Recorded {} attempt for user {}: {}/{}", operation, user.id, decision.count, decision.limit);

    Ok(Json(json!({
        "allowed": decision.allowed,
        "count": decision.count,
        "limit": decision.limit,
        "remaining": decision.remaining(),
        "window_secs": rule.window_secs,
        "degraded": decision.degraded,
    })))
}
