// =====================================================================================
// SECURITY CELL - REQUEST RATE LIMITING
// =====================================================================================
//
// Fixed-window counters guarding hot write endpoints (login, search recording,
// booking creation). The counter lives in the shared cache backend so every
// API instance sees the same window.
//
// =====================================================================================

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod router;
pub mod services;

pub use middleware::{rate_limit_middleware, RateLimitLayerState};
pub use models::{KeyScope, RateLimitDecision, RateLimitError, RateLimitKey, RateLimitedOperation};
pub use router::create_security_router;
pub use services::RateLimiter;
