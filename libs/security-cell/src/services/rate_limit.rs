use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use performance_cell::CacheBackend;
use shared_config::RateLimitRule;

use crate::models::{RateLimitDecision, RateLimitError, RateLimitKey};

/// Fixed-window counter. The first increment in a fresh window attaches an
/// expiry equal to the window length and the window rolls over when the key
/// expires. Bursts straddling a boundary can reach twice the nominal rate.
pub struct RateLimiter {
    backend: Arc<dyn CacheBackend>,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Counts the request and rejects it once the window's count exceeds the
    /// limit. Backend failures fail open: the request passes with
    /// `degraded = true`.
    pub async fn check(&self, key: &RateLimitKey, rule: RateLimitRule) -> Result<RateLimitDecision, RateLimitError> {
        match self.try_check(key, rule).await {
            Ok(decision) if decision.allowed => Ok(decision),
            Ok(decision) => Err(RateLimitError::TooManyRequests {
                operation: key.operation().to_string(),
                count: decision.count,
                limit: decision.limit,
                retry_after_secs: decision.retry_after_secs,
            }),
            Err(e) => {
                warn!("Rate limiter unavailable for {}, allowing request: {}", key.counter_key(), e);
                Ok(RateLimitDecision {
                    allowed: true,
                    count: 0,
                    limit: rule.limit,
                    retry_after_secs: 0,
                    degraded: true,
                })
            }
        }
    }

    /// Same as [`check`](Self::check) but surfaces backend errors and never
    /// converts a rejection into an error.
    pub async fn try_check(&self, key: &RateLimitKey, rule: RateLimitRule) -> Result<RateLimitDecision, RateLimitError> {
        let counter_key = key.counter_key();
        let window = Duration::from_secs(rule.window_secs.max(1));

        let count = self.backend.incr(&counter_key).await?;
        let count = u64::try_from(count).unwrap_or(0);

        let mut retry_after_secs = rule.window_secs;
        if count == 1 {
            self.backend.expire(&counter_key, window).await?;
        } else {
            match self.backend.ttl(&counter_key).await? {
                Some(ttl) => retry_after_secs = ttl.as_secs().max(1),
                None => {
                    // Expiry was lost (e.g. crash between INCR and EXPIRE);
                    // restart the window rather than blocking forever.
                    warn!("Rate limit counter {} had no expiry, resetting window", counter_key);
                    self.backend.expire(&counter_key, window).await?;
                }
            }
        }

        let allowed = count <= u64::from(rule.limit);
        if !allowed {
            debug!("Rate limit hit for {}: {}/{}", counter_key, count, rule.limit);
        }

        Ok(RateLimitDecision {
            allowed,
            count,
            limit: rule.limit,
            retry_after_secs,
            degraded: false,
        })
    }
}
