// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use performance_cell::{CacheKeys, CacheService};
use schedule_cell::ScheduleQuotaManager;
use shared_config::AppConfig;

use crate::models::{
    Appointment, AppointmentAction, AppointmentError, AppointmentStatus, BookAppointmentRequest, TransitionOutcome,
};
use crate::services::cache_coherence::AppointmentCacheInvalidator;
use crate::services::lifecycle::{AppointmentLifecycleService, TransitionCheck};
use crate::services::notification::{dispatch, BookingEvent, NotificationDispatcher};
use crate::services::queue_number::QueueNumberAllocator;
use crate::store::AppointmentStore;

/// Creates bookings and drives them through their lifecycle. Quota is taken
/// on creation and given back only on cancellation.
pub struct AppointmentStateMachine {
    store: Arc<dyn AppointmentStore>,
    quota: Arc<ScheduleQuotaManager>,
    allocator: QueueNumberAllocator,
    invalidator: Arc<AppointmentCacheInvalidator>,
    notifier: Arc<dyn NotificationDispatcher>,
    cache: Arc<CacheService>,
    max_transition_attempts: u32,
    detail_ttl: Duration,
}

impl AppointmentStateMachine {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn AppointmentStore>,
        quota: Arc<ScheduleQuotaManager>,
        cache: Arc<CacheService>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            allocator: QueueNumberAllocator::new(Arc::clone(&store), config.booking.max_queue_number_retries),
            invalidator: Arc::new(AppointmentCacheInvalidator::new(Arc::clone(&cache))),
            store,
            quota,
            notifier,
            cache,
            max_transition_attempts: config.booking.max_quota_retries + 1,
            detail_ttl: Duration::from_secs(config.cache.detail_ttl_secs),
        }
    }

    pub fn store(&self) -> Arc<dyn AppointmentStore> {
        Arc::clone(&self.store)
    }

    pub fn invalidator(&self) -> Arc<AppointmentCacheInvalidator> {
        Arc::clone(&self.invalidator)
    }

    pub fn notifier(&self) -> Arc<dyn NotificationDispatcher> {
        Arc::clone(&self.notifier)
    }

    #[instrument(skip(self, request), fields(patient_id = %request.patient_id, schedule_id = %request.schedule_id))]
    pub async fn book(&self, request: BookAppointmentRequest) -> Result<Appointment, AppointmentError> {
        // Step 1: read the slot from storage, never from cache
        let slot = self
            .quota
            .store()
            .find_slot(request.schedule_id)
            .await?
            .ok_or(AppointmentError::ScheduleNotFound)?;
        if slot.is_closed() {
            return Err(AppointmentError::SlotClosed);
        }

        // Step 2: one open booking per patient per slot. Concurrent requests
        // that both pass here are settled by the store on insert.
        if let Some(existing) = self.store.find_open_booking(request.patient_id, slot.id).await? {
            debug!("Patient already holds appointment {} on this slot", existing.id);
            return Err(AppointmentError::DuplicateBooking);
        }

        // Step 3: take one unit of quota
        self.quota.decrease_quota(slot.id).await?;

        // Step 4: number and insert; give the unit back if that fails
        let now = Utc::now();
        let draft = Appointment {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            doctor_id: slot.doctor_id,
            schedule_id: slot.id,
            appointment_date: slot.schedule_date,
            time_slot: slot.time_slot,
            queue_number: 0,
            status: if request.requires_payment {
                AppointmentStatus::PendingPayment
            } else {
                AppointmentStatus::Confirmed
            },
            version: 0,
            patient_notes: request.patient_notes,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let appointment = match self.allocator.allocate_and_insert(draft).await {
            Ok(appointment) => appointment,
            Err(e) => {
                self.release_quota(slot.id, "failed booking insert").await;
                return Err(e);
            }
        };

        // Step 5: drop stale views and tell the patient
        self.invalidator.on_booking_changed(&appointment).await;
        dispatch(&self.notifier, BookingEvent::for_patient(&appointment));

        info!(
            "Booked appointment {} with queue number {} on {} {}",
            appointment.id, appointment.queue_number, appointment.appointment_date, appointment.time_slot
        );
        Ok(appointment)
    }

    pub async fn confirm_payment(&self, appointment_id: Uuid) -> Result<TransitionOutcome, AppointmentError> {
        self.transition(appointment_id, AppointmentAction::ConfirmPayment, None).await
    }

    pub async fn start(&self, appointment_id: Uuid) -> Result<TransitionOutcome, AppointmentError> {
        self.transition(appointment_id, AppointmentAction::Start, None).await
    }

    /// No quota effect: capacity was consumed at creation.
    pub async fn complete(&self, appointment_id: Uuid) -> Result<TransitionOutcome, AppointmentError> {
        self.transition(appointment_id, AppointmentAction::Complete, None).await
    }

    /// Idempotent. Gives the quota unit back only when this call performed
    /// the cancellation.
    #[instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> Result<TransitionOutcome, AppointmentError> {
        let outcome = self.transition(appointment_id, AppointmentAction::Cancel, reason).await?;
        if outcome.changed {
            self.release_quota(outcome.appointment.schedule_id, "cancellation").await;
        } else {
            info!(
                "Cancel of appointment {} ignored, already {}",
                appointment_id, outcome.appointment.status
            );
        }
        Ok(outcome)
    }

    /// Manual no-show. The slot unit is not returned.
    pub async fn mark_no_show(&self, appointment_id: Uuid) -> Result<TransitionOutcome, AppointmentError> {
        self.transition(appointment_id, AppointmentAction::MarkNoShow, None).await
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let key = CacheKeys::appointment_detail(appointment_id);
        self.cache
            .get_or_load(&key, self.detail_ttl, || async {
                self.store
                    .find(appointment_id)
                    .await?
                    .ok_or(AppointmentError::NotFound)
            })
            .await
    }

    async fn transition(
        &self,
        appointment_id: Uuid,
        action: AppointmentAction,
        reason: Option<String>,
    ) -> Result<TransitionOutcome, AppointmentError> {
        for attempt in 1..=self.max_transition_attempts {
            let current = self
                .store
                .find(appointment_id)
                .await?
                .ok_or(AppointmentError::NotFound)?;

            let target = match AppointmentLifecycleService::validate_transition(current.status, action)? {
                TransitionCheck::Apply(target) => target,
                TransitionCheck::NoOp => {
                    return Ok(TransitionOutcome { appointment: current, changed: false });
                }
            };

            let written = self
                .store
                .update_status(appointment_id, &[current.status], target, current.version, reason.clone())
                .await?;

            match written {
                Some(updated) => {
                    info!("Appointment {} {} -> {}", appointment_id, current.status, updated.status);
                    self.invalidator.on_booking_changed(&updated).await;
                    dispatch(&self.notifier, BookingEvent::for_patient(&updated));
                    return Ok(TransitionOutcome { appointment: updated, changed: true });
                }
                None => debug!(
                    "Appointment {} changed during {} (attempt {}/{})",
                    appointment_id, action, attempt, self.max_transition_attempts
                ),
            }
        }

        Err(AppointmentError::RetryLater)
    }

    async fn release_quota(&self, schedule_id: Uuid, context: &str) {
        if let Err(e) = self.quota.increase_quota(schedule_id).await {
            error!("Quota on schedule {} not released after {}: {}", schedule_id, context, e);
        }
    }
}
