use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use schedule_cell::{StoreError, TimeSlot};

use crate::models::{Appointment, AppointmentFilter, AppointmentStatus, QueuePosition};

/// Persistence for appointments.
///
/// `(doctor_id, appointment_date, time_slot, queue_number)` is unique across
/// every row, cancelled ones included; `insert` reports a clash as
/// `StoreError::UniqueViolation`.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    async fn find(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn queue_position(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time_slot: TimeSlot,
    ) -> Result<QueuePosition, StoreError>;

    /// A booking of this patient on this schedule that is not yet terminal.
    async fn find_open_booking(&self, patient_id: Uuid, schedule_id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Conditional status write. Matches only while the row's status is in
    /// `from` and its version equals `expected_version`. Returns `None` when
    /// zero rows matched.
    async fn update_status(
        &self,
        id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
        expected_version: i64,
        reason: Option<String>,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Confirmed or in-progress bookings dated on or before `date`.
    async fn list_no_show_candidates(&self, date: NaiveDate) -> Result<Vec<Appointment>, StoreError>;

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    rows: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_tuple(a: &Appointment, doctor_id: Uuid, date: NaiveDate, time_slot: TimeSlot) -> bool {
    a.doctor_id == doctor_id && a.appointment_date == date && a.time_slot == time_slot
}

pub(crate) fn listing_order(a: &Appointment, b: &Appointment) -> std::cmp::Ordering {
    b.appointment_date
        .cmp(&a.appointment_date)
        .then(a.time_slot.rank().cmp(&b.time_slot.rank()))
        .then(a.queue_number.cmp(&b.queue_number))
        .then(a.created_at.cmp(&b.created_at))
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut rows = self.rows.write().await;
        let clash = rows.values().any(|a| {
            same_tuple(a, appointment.doctor_id, appointment.appointment_date, appointment.time_slot)
                && a.queue_number == appointment.queue_number
        });
        if clash {
            return Err(StoreError::UniqueViolation(format!(
                "queue number {} already issued for doctor {} on {} {}",
                appointment.queue_number, appointment.doctor_id, appointment.appointment_date, appointment.time_slot
            )));
        }

        // One open booking per patient and schedule
        let already_open = appointment.status.is_open()
            && rows.values().any(|a| {
                a.patient_id == appointment.patient_id && a.schedule_id == appointment.schedule_id && a.status.is_open()
            });
        if already_open {
            return Err(StoreError::UniqueViolation(format!(
                "patient {} already holds an open booking on schedule {}",
                appointment.patient_id, appointment.schedule_id
            )));
        }
        rows.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn queue_position(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time_slot: TimeSlot,
    ) -> Result<QueuePosition, StoreError> {
        let rows = self.rows.read().await;
        let mut position = QueuePosition::default();
        for a in rows.values().filter(|a| same_tuple(a, doctor_id, date, time_slot)) {
            position.highest_issued = position.highest_issued.max(a.queue_number);
            if a.status != AppointmentStatus::Cancelled {
                position.active_count += 1;
            }
        }
        Ok(position)
    }

    async fn find_open_booking(&self, patient_id: Uuid, schedule_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|a| a.patient_id == patient_id && a.schedule_id == schedule_id && a.status.is_open())
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
        expected_version: i64,
        reason: Option<String>,
    ) -> Result<Option<Appointment>, StoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if !from.contains(&row.status) || row.version != expected_version {
            return Ok(None);
        }

        row.status = to;
        row.version += 1;
        row.updated_at = Utc::now();
        if reason.is_some() {
            row.cancellation_reason = reason;
        }
        Ok(Some(row.clone()))
    }

    async fn list_no_show_candidates(&self, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        let mut due: Vec<Appointment> = self
            .rows
            .read()
            .await
            .values()
            .filter(|a| {
                matches!(a.status, AppointmentStatus::Confirmed | AppointmentStatus::InProgress)
                    && a.appointment_date <= date
            })
            .cloned()
            .collect();
        due.sort_by(listing_order);
        Ok(due)
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError> {
        let mut found: Vec<Appointment> = self
            .rows
            .read()
            .await
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        found.sort_by(listing_order);

        let page = found.into_iter().skip(filter.offset as usize);
        Ok(if filter.limit == 0 {
            page.collect()
        } else {
            page.take(filter.limit as usize).collect()
        })
    }
}
