use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use performance_cell::CacheError;
use shared_config::{RateLimitConfig, RateLimitRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitedOperation {
    Login,
    Search,
    Booking,
}

impl RateLimitedOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitedOperation::Login => "login",
            RateLimitedOperation::Search => "search",
            RateLimitedOperation::Booking => "booking",
        }
    }

    pub fn rule(&self, limits: &RateLimitConfig) -> RateLimitRule {
        match self {
            RateLimitedOperation::Login => limits.login,
            RateLimitedOperation::Search => limits.search_record,
            RateLimitedOperation::Booking => limits.booking_create,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "login" => Some(RateLimitedOperation::Login),
            "search" => Some(RateLimitedOperation::Search),
            "booking" => Some(RateLimitedOperation::Booking),
            _ => None,
        }
    }
}

impl fmt::Display for RateLimitedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which request attributes make up a limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    Ip,
    User,
    IpAndUser,
}

/// Logical limiter key, composable as `operation:ip:<addr>` and/or
/// `operation:user:<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitKey {
    operation: String,
    ip: Option<String>,
    user_id: Option<String>,
}

impl RateLimitKey {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ip: None,
            user_id: None,
        }
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn counter_key(&self) -> String {
        let mut key = format!("rate_limit:{}", self.operation);
        if let Some(ip) = &self.ip {
            key.push_str(":ip:");
            key.push_str(ip);
        }
        if let Some(user_id) = &self.user_id {
            key.push_str(":user:");
            key.push_str(user_id);
        }
        key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: u64,
    pub limit: u32,
    /// Seconds until the current window's counter expires.
    pub retry_after_secs: u64,
    /// Set when the backend was unreachable and the request was let through.
    pub degraded: bool,
}

impl RateLimitDecision {
    pub fn remaining(&self) -> u64 {
        u64::from(self.limit).saturating_sub(self.count)
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {operation}: {count}/{limit}")]
    TooManyRequests {
        operation: String,
        count: u64,
        limit: u32,
        retry_after_secs: u64,
    },

    #[error("Rate limit backend error: {0}")]
    Backend(#[from] CacheError),
}
