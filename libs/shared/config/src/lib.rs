use std::env;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub redis_url: Option<String>,
    pub server_port: u16,
    pub booking: BookingConfig,
    pub no_show: NoShowConfig,
    pub cache: CacheConfig,
    pub rate_limits: RateLimitConfig,
}

/// Bounds for the optimistic-locking retry loops on the booking path.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub max_quota_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_queue_number_retries: u32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            max_quota_retries: 3,
            retry_backoff_ms: 20,
            max_queue_number_retries: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NoShowConfig {
    pub sweep_interval_secs: u64,
    pub morning_cutoff: NaiveTime,
    pub afternoon_cutoff: NaiveTime,
    pub evening_cutoff: NaiveTime,
}

impl Default for NoShowConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 1800,
            morning_cutoff: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
            afternoon_cutoff: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            evening_cutoff: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub admin_list_ttl_secs: u64,
    pub detail_ttl_secs: u64,
    pub doctor_list_ttl_secs: u64,
    pub patient_stats_ttl_secs: u64,
    /// Listings deeper than this page are never cached.
    pub cached_page_limit: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            admin_list_ttl_secs: 300,
            detail_ttl_secs: 1800,
            doctor_list_ttl_secs: 300,
            patient_stats_ttl_secs: 600,
            cached_page_limit: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }
}

/// Parses the `<limit>/<window_secs>` form used by the `RATE_LIMIT_*` variables.
impl FromStr for RateLimitRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (limit, window) = s
            .split_once('/')
            .ok_or_else(|| format!("expected <limit>/<window_secs>, got '{}'", s))?;

        let limit = limit.trim().parse::<u32>()
            .map_err(|e| format!("invalid limit '{}': {}", limit, e))?;
        let window_secs = window.trim().parse::<u64>()
            .map_err(|e| format!("invalid window '{}': {}", window, e))?;

        if window_secs == 0 {
            return Err("window must be at least one second".to_string());
        }

        Ok(Self { limit, window_secs })
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login: RateLimitRule,
    pub search_record: RateLimitRule,
    pub booking_create: RateLimitRule,
    /// Read the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only safe when every request arrives through a proxy that overwrites them.
    pub trust_proxy_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: RateLimitRule::new(5, 60),
            search_record: RateLimitRule::new(30, 60),
            booking_create: RateLimitRule::new(10, 60),
            trust_proxy_headers: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults_booking = BookingConfig::default();
        let defaults_no_show = NoShowConfig::default();
        let defaults_cache = CacheConfig::default();
        let defaults_limits = RateLimitConfig::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using in-memory stores");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok(),
            server_port: parse_or("PORT", 3000),
            booking: BookingConfig {
                max_quota_retries: parse_or("BOOKING_MAX_QUOTA_RETRIES", defaults_booking.max_quota_retries),
                ..defaults_booking
            },
            no_show: NoShowConfig {
                sweep_interval_secs: parse_or("NO_SHOW_SWEEP_INTERVAL_SECS", defaults_no_show.sweep_interval_secs),
                ..defaults_no_show
            },
            cache: CacheConfig {
                admin_list_ttl_secs: parse_or("CACHE_ADMIN_LIST_TTL_SECS", defaults_cache.admin_list_ttl_secs),
                detail_ttl_secs: parse_or("CACHE_DETAIL_TTL_SECS", defaults_cache.detail_ttl_secs),
                ..defaults_cache
            },
            rate_limits: RateLimitConfig {
                login: parse_or("RATE_LIMIT_LOGIN", defaults_limits.login),
                search_record: parse_or("RATE_LIMIT_SEARCH", defaults_limits.search_record),
                booking_create: parse_or("RATE_LIMIT_BOOKING", defaults_limits.booking_create),
                trust_proxy_headers: parse_or("TRUST_PROXY_HEADERS", defaults_limits.trust_proxy_headers),
            },
        };

        if !config.is_configured() {
            warn!("Application not fully configured - running with in-memory persistence");
        }

        if config.redis_url.is_none() {
            warn!("REDIS_URL not set, caches and rate limits are process-local");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|e| {
            warn!("{} has invalid value '{}' ({}), using default", key, raw, e);
            default
        }),
        Err(_) => default,
    }
}
