use std::sync::Arc;

use tracing::{debug, warn};

use performance_cell::{CacheKeys, CacheService, InvalidationReport};

use crate::models::{Appointment, PatientListKind};
use crate::services::query::patient_list_key;

/// Invalidate-on-write policy for every read view that can show a booking.
/// Never fails the caller: a missed invalidation degrades to TTL expiry.
pub struct AppointmentCacheInvalidator {
    cache: Arc<CacheService>,
}

impl AppointmentCacheInvalidator {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    /// Exact keys derived from the booking's own ids and date.
    pub fn keys_for(appointment: &Appointment) -> Vec<String> {
        let mut keys = vec![CacheKeys::appointment_detail(appointment.id)];
        keys.extend(
            PatientListKind::ALL
                .iter()
                .map(|kind| patient_list_key(*kind, appointment.doctor_id, appointment.appointment_date)),
        );
        keys.push(CacheKeys::doctor_today_stats(appointment.doctor_id, appointment.appointment_date));
        keys.push(CacheKeys::patient_appointment_list(appointment.patient_id));
        keys.push(CacheKeys::patient_recent_appointments(appointment.patient_id));
        keys
    }

    /// Patterns covering every filtered/paged variant of the coarse listings.
    pub fn patterns() -> [String; 2] {
        [CacheKeys::admin_appointment_list_pattern(), CacheKeys::statistics_pattern()]
    }

    pub async fn on_booking_changed(&self, appointment: &Appointment) -> InvalidationReport {
        let mut report = self.cache.invalidate(&Self::keys_for(appointment)).await;
        for pattern in Self::patterns() {
            report.merge(self.cache.invalidate_pattern(&pattern).await);
        }

        if report.is_clean() {
            debug!("Invalidated {} cache keys for appointment {}", report.keys_deleted, appointment.id);
        } else {
            warn!(
                "Cache invalidation for appointment {} had {} failures; views stale until TTL",
                appointment.id, report.failures
            );
        }
        report
    }
}
