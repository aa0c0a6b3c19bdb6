use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};
use uuid::Uuid;

use schedule_cell::{StoreError, TimeSlot};

use crate::models::{Appointment, AppointmentError, QueuePosition};
use crate::store::AppointmentStore;

/// Assigns queue numbers within a (doctor, date, time slot) tuple.
///
/// The next number follows every number ever issued in the tuple, so a
/// cancelled patient's number is never handed out again. With no
/// cancellations this is the count of non-cancelled bookings plus one.
/// Uniqueness is enforced by the store; a clash means another booking
/// committed first. When that booking is the same patient's open booking on
/// the same schedule the draft is a duplicate, otherwise the number is
/// recomputed.
pub struct QueueNumberAllocator {
    store: Arc<dyn AppointmentStore>,
    max_retries: u32,
}

impl QueueNumberAllocator {
    pub fn new(store: Arc<dyn AppointmentStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    pub fn next_from(position: QueuePosition) -> i32 {
        position.highest_issued.max(position.active_count) + 1
    }

    pub async fn next_queue_number(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time_slot: TimeSlot,
    ) -> Result<i32, AppointmentError> {
        let position = self.store.queue_position(doctor_id, date, time_slot).await?;
        Ok(Self::next_from(position))
    }

    /// Numbers and inserts `draft`, recomputing the number when a concurrent
    /// booking took it first.
    pub async fn allocate_and_insert(&self, mut draft: Appointment) -> Result<Appointment, AppointmentError> {
        let attempts = self.max_retries + 1;

        for attempt in 1..=attempts {
            draft.queue_number = self
                .next_queue_number(draft.doctor_id, draft.appointment_date, draft.time_slot)
                .await?;

            match self.store.insert(draft.clone()).await {
                Ok(saved) => {
                    debug!("Issued queue number {} for appointment {}", saved.queue_number, saved.id);
                    return Ok(saved);
                }
                Err(StoreError::UniqueViolation(msg)) => {
                    if self.store.find_open_booking(draft.patient_id, draft.schedule_id).await?.is_some() {
                        debug!("Patient {} already booked schedule {}", draft.patient_id, draft.schedule_id);
                        return Err(AppointmentError::DuplicateBooking);
                    }
                    debug!(
                        "Queue number {} taken (attempt {}/{}): {}",
                        draft.queue_number, attempt, attempts, msg
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            "Could not issue a queue number for doctor {} on {} {} after {} attempts",
            draft.doctor_id, draft.appointment_date, draft.time_slot, attempts
        );
        Err(AppointmentError::RetryLater)
    }
}
