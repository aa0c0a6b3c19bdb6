use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

use performance_cell::{CacheKeys, CacheService};
use shared_config::{AppConfig, CacheConfig};

use crate::models::{
    AdminListQuery, Appointment, AppointmentError, AppointmentFilter, AppointmentPage, AppointmentStatus,
    DoctorTodayStats, PatientListKind, PatientRecentStats,
};
use crate::store::AppointmentStore;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;
const COMPLETED_LIST_LIMIT: u32 = 50;
const RECENT_APPOINTMENTS: usize = 5;

/// Only the today list is pinned to a day; the pending and completed lists
/// are invalidated by doctor alone.
pub(crate) fn patient_list_key(kind: PatientListKind, doctor_id: Uuid, day: NaiveDate) -> String {
    match kind {
        PatientListKind::Today => CacheKeys::doctor_today_list(doctor_id, day),
        PatientListKind::Pending | PatientListKind::Completed => {
            CacheKeys::doctor_patient_list(kind.as_str(), doctor_id)
        }
    }
}

/// Cached read views over appointments. Every view can be rebuilt from the
/// store, and each is dropped by `AppointmentCacheInvalidator` on writes.
pub struct AppointmentQueryService {
    store: Arc<dyn AppointmentStore>,
    cache: Arc<CacheService>,
    config: CacheConfig,
}

impl AppointmentQueryService {
    pub fn new(config: &AppConfig, store: Arc<dyn AppointmentStore>, cache: Arc<CacheService>) -> Self {
        Self {
            store,
            cache,
            config: config.cache.clone(),
        }
    }

    /// Only the first `cached_page_limit` pages are cached.
    pub async fn admin_list(&self, query: AdminListQuery) -> Result<AppointmentPage, AppointmentError> {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let key = CacheKeys::admin_appointment_list()
            .page(page, page_size)
            .filter("status", query.status)
            .filter("doctor_id", query.doctor_id)
            .filter("patient_id", query.patient_id)
            .filter("date", query.date);

        let offset = (page - 1)
            .checked_mul(page_size)
            .ok_or_else(|| AppointmentError::Validation(format!("page {} is out of range", page)))?;

        let filter = AppointmentFilter {
            doctor_id: query.doctor_id,
            patient_id: query.patient_id,
            statuses: query.status.into_iter().collect(),
            date_from: query.date,
            date_to: query.date,
            // One extra row tells whether another page exists.
            limit: page_size + 1,
            offset,
        };

        let load = || async {
            let mut items = self.store.list(&filter).await?;
            let has_more = items.len() > page_size as usize;
            items.truncate(page_size as usize);
            Ok::<_, AppointmentError>(AppointmentPage { items, page, page_size, has_more })
        };

        if key.is_cacheable(self.config.cached_page_limit) {
            let ttl = Duration::from_secs(self.config.admin_list_ttl_secs);
            self.cache.get_or_load(&key.build(), ttl, load).await
        } else {
            load().await
        }
    }

    pub async fn doctor_patient_list(
        &self,
        doctor_id: Uuid,
        kind: PatientListKind,
        today: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let filter = match kind {
            PatientListKind::Pending => AppointmentFilter {
                doctor_id: Some(doctor_id),
                statuses: vec![AppointmentStatus::PendingPayment, AppointmentStatus::Confirmed],
                date_from: Some(today),
                ..AppointmentFilter::default()
            },
            PatientListKind::Today => AppointmentFilter {
                doctor_id: Some(doctor_id),
                statuses: AppointmentStatus::ALL
                    .into_iter()
                    .filter(|s| *s != AppointmentStatus::Cancelled)
                    .collect(),
                date_from: Some(today),
                date_to: Some(today),
                ..AppointmentFilter::default()
            },
            PatientListKind::Completed => AppointmentFilter {
                doctor_id: Some(doctor_id),
                statuses: vec![AppointmentStatus::Completed],
                limit: COMPLETED_LIST_LIMIT,
                ..AppointmentFilter::default()
            },
        };

        let key = patient_list_key(kind, doctor_id, today);
        let ttl = Duration::from_secs(self.config.doctor_list_ttl_secs);
        self.cache
            .get_or_load(&key, ttl, || async { Ok(self.store.list(&filter).await?) })
            .await
    }

    /// Every booking the patient holds, newest first.
    pub async fn patient_appointments(&self, patient_id: Uuid) -> Result<Vec<Appointment>, AppointmentError> {
        let key = CacheKeys::patient_appointment_list(patient_id);
        let ttl = Duration::from_secs(self.config.patient_stats_ttl_secs);
        let filter = AppointmentFilter {
            patient_id: Some(patient_id),
            ..AppointmentFilter::default()
        };
        self.cache
            .get_or_load(&key, ttl, || async { Ok(self.store.list(&filter).await?) })
            .await
    }

    pub async fn doctor_today_stats(
        &self,
        doctor_id: Uuid,
        today: NaiveDate,
    ) -> Result<DoctorTodayStats, AppointmentError> {
        let key = CacheKeys::doctor_today_stats(doctor_id, today);
        let ttl = Duration::from_secs(self.config.doctor_list_ttl_secs);

        self.cache
            .get_or_load(&key, ttl, || async {
                let filter = AppointmentFilter {
                    doctor_id: Some(doctor_id),
                    date_from: Some(today),
                    date_to: Some(today),
                    ..AppointmentFilter::default()
                };
                let rows = self.store.list(&filter).await?;

                let mut stats = DoctorTodayStats {
                    doctor_id,
                    date: today,
                    total: rows.len() as u32,
                    ..DoctorTodayStats::default()
                };
                for row in &rows {
                    match row.status {
                        AppointmentStatus::PendingPayment | AppointmentStatus::Confirmed => stats.pending += 1,
                        AppointmentStatus::InProgress => stats.in_progress += 1,
                        AppointmentStatus::Completed => stats.completed += 1,
                        AppointmentStatus::NoShow => stats.no_show += 1,
                        AppointmentStatus::Cancelled => stats.cancelled += 1,
                    }
                }
                Ok(stats)
            })
            .await
    }

    pub async fn patient_recent_stats(&self, patient_id: Uuid) -> Result<PatientRecentStats, AppointmentError> {
        let key = CacheKeys::patient_recent_appointments(patient_id);
        let ttl = Duration::from_secs(self.config.patient_stats_ttl_secs);

        self.cache
            .get_or_load(&key, ttl, || async {
                let filter = AppointmentFilter {
                    patient_id: Some(patient_id),
                    ..AppointmentFilter::default()
                };
                let rows = self.store.list(&filter).await?;

                let mut by_status = BTreeMap::new();
                for row in &rows {
                    *by_status.entry(row.status).or_insert(0u32) += 1;
                }

                Ok(PatientRecentStats {
                    patient_id,
                    total: rows.len() as u32,
                    by_status,
                    recent: rows.into_iter().take(RECENT_APPOINTMENTS).collect(),
                })
            })
            .await
    }
}
