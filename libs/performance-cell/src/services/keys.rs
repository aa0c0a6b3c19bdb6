use std::collections::BTreeMap;
use std::fmt::Display;

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the filter digest.
pub const FILTER_HASH_LEN: usize = 8;

/// Every cache key in the system is built here so prefixes, the hashing
/// algorithm, and the truncation length are defined exactly once.
pub struct CacheKeys;

impl CacheKeys {
    pub const ADMIN_APPOINTMENT_LIST: &'static str = "admin:appointment:list";
    pub const STATISTICS_PREFIX: &'static str = "statistics";

    pub fn admin_appointment_list() -> ListCacheKey {
        ListCacheKey::new(Self::ADMIN_APPOINTMENT_LIST)
    }

    pub fn admin_appointment_list_pattern() -> String {
        pattern_for(Self::ADMIN_APPOINTMENT_LIST)
    }

    pub fn appointment_detail(appointment_id: impl Display) -> String {
        format!("appointment:detail:{}", appointment_id)
    }

    pub fn doctor_patient_list(kind: &str, doctor_id: impl Display) -> String {
        format!("doctor:patient:list:{}:doctor:{}", kind, doctor_id)
    }

    /// Day-scoped views carry their date so a cached day never answers for the next one.
    pub fn doctor_today_list(doctor_id: impl Display, day: impl Display) -> String {
        format!("doctor:patient:list:today:doctor:{}:{}", doctor_id, day)
    }

    pub fn doctor_today_stats(doctor_id: impl Display, day: impl Display) -> String {
        format!("doctor:stats:today:doctor:{}:{}", doctor_id, day)
    }

    pub fn patient_appointment_list(patient_id: impl Display) -> String {
        format!("patient:appointment:list:patient:{}", patient_id)
    }

    pub fn patient_recent_appointments(patient_id: impl Display) -> String {
        format!("patient:stats:recent-appointments:patient:{}", patient_id)
    }

    pub fn schedule_detail(schedule_id: impl Display) -> String {
        format!("schedule:detail:{}", schedule_id)
    }

    pub fn doctor_schedule_list(doctor_id: impl Display, from: impl Display, to: impl Display) -> String {
        format!("schedule:list:doctor:{}:{}:{}", doctor_id, from, to)
    }

    pub fn doctor_schedule_list_pattern(doctor_id: impl Display) -> String {
        format!("schedule:list:doctor:{}:*", doctor_id)
    }

    pub fn statistics_pattern() -> String {
        pattern_for(Self::STATISTICS_PREFIX)
    }
}

fn pattern_for(prefix: &str) -> String {
    format!("{}:*", prefix)
}

/// Key for a paginated listing: page and size stay literal for debugging,
/// every other filter is folded into a short digest so the key length is
/// bounded regardless of how many filters a caller passes.
#[derive(Debug, Clone)]
pub struct ListCacheKey {
    prefix: &'static str,
    page: u32,
    page_size: u32,
    filters: BTreeMap<String, String>,
}

impl ListCacheKey {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            page: 1,
            page_size: 10,
            filters: BTreeMap::new(),
        }
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Absent filters are skipped, so `None` and "not passed" hash identically.
    pub fn filter<V: Display>(mut self, name: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.filters.insert(name.to_string(), value.to_string());
        }
        self
    }

    /// Deep pages are rarely requested and are not worth the invalidation cost.
    pub fn is_cacheable(&self, cached_page_limit: u32) -> bool {
        self.page >= 1 && self.page <= cached_page_limit
    }

    pub fn filter_hash(&self) -> String {
        let canonical = self
            .filters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let digest = Sha256::digest(canonical.as_bytes());
        let mut hex = String::with_capacity(FILTER_HASH_LEN);
        for byte in digest.iter().take(FILTER_HASH_LEN.div_ceil(2)) {
            hex.push_str(&format!("{:02x}", byte));
        }
        hex.truncate(FILTER_HASH_LEN);
        hex
    }

    pub fn build(&self) -> String {
        format!(
            "{}:p{}:s{}:h:{}",
            self.prefix,
            self.page,
            self.page_size,
            self.filter_hash()
        )
    }
}
