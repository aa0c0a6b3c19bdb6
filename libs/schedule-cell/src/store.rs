use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_database::DatabaseError;

use crate::models::{ScheduleSlot, ScheduleStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(msg) => StoreError::UniqueViolation(msg),
            DatabaseError::NotFound(msg) => StoreError::NotFound(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Persistence for schedule slots.
///
/// The `try_*` methods are conditional single-row updates keyed on
/// `(id, version)`: they return the updated row, or `None` when zero rows
/// matched because the version moved or a guard rejected the change.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Fails with `UniqueViolation` when the (doctor, date, time slot) tuple exists.
    async fn insert_slot(&self, slot: ScheduleSlot) -> Result<ScheduleSlot, StoreError>;

    async fn find_slot(&self, id: Uuid) -> Result<Option<ScheduleSlot>, StoreError>;

    async fn list_doctor_slots(
        &self,
        doctor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleSlot>, StoreError>;

    /// Guards: version matches, `remaining_quota > 0`, not closed.
    async fn try_decrement(&self, seen: &ScheduleSlot) -> Result<Option<ScheduleSlot>, StoreError>;

    /// Guards: version matches, `booked_quota > 0`, `remaining_quota < total_quota`.
    async fn try_increment(&self, seen: &ScheduleSlot) -> Result<Option<ScheduleSlot>, StoreError>;

    /// Guard: version matches.
    async fn try_set_status(
        &self,
        seen: &ScheduleSlot,
        status: ScheduleStatus,
    ) -> Result<Option<ScheduleSlot>, StoreError>;
}

/// Slot store held in process memory. Each conditional update runs under
/// the write lock, which gives it the same all-or-nothing behavior as the
/// single-statement SQL update.
#[derive(Default)]
pub struct InMemoryQuotaStore {
    slots: RwLock<HashMap<Uuid, ScheduleSlot>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn conditional_update<F>(&self, seen: &ScheduleSlot, apply: F) -> Result<Option<ScheduleSlot>, StoreError>
    where
        F: FnOnce(&ScheduleSlot) -> Option<ScheduleSlot> + Send,
    {
        let mut slots = self.slots.write().await;
        let current = slots
            .get_mut(&seen.id)
            .ok_or_else(|| StoreError::NotFound(seen.id.to_string()))?;

        if current.version != seen.version {
            return Ok(None);
        }

        match apply(current) {
            Some(next) => {
                *current = next.clone();
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn insert_slot(&self, slot: ScheduleSlot) -> Result<ScheduleSlot, StoreError> {
        let mut slots = self.slots.write().await;
        let duplicate = slots.values().any(|s| {
            s.doctor_id == slot.doctor_id && s.schedule_date == slot.schedule_date && s.time_slot == slot.time_slot
        });
        if duplicate {
            return Err(StoreError::UniqueViolation(format!(
                "schedule for doctor {} on {} {}",
                slot.doctor_id, slot.schedule_date, slot.time_slot
            )));
        }
        slots.insert(slot.id, slot.clone());
        Ok(slot)
    }

    async fn find_slot(&self, id: Uuid) -> Result<Option<ScheduleSlot>, StoreError> {
        Ok(self.slots.read().await.get(&id).cloned())
    }

    async fn list_doctor_slots(
        &self,
        doctor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleSlot>, StoreError> {
        let mut found: Vec<ScheduleSlot> = self
            .slots
            .read()
            .await
            .values()
            .filter(|s| s.doctor_id == doctor_id && s.schedule_date >= from && s.schedule_date <= to)
            .cloned()
            .collect();
        found.sort_by_key(|s| (s.schedule_date, s.time_slot.rank()));
        Ok(found)
    }

    async fn try_decrement(&self, seen: &ScheduleSlot) -> Result<Option<ScheduleSlot>, StoreError> {
        self.conditional_update(seen, |current| current.after_decrement()).await
    }

    async fn try_increment(&self, seen: &ScheduleSlot) -> Result<Option<ScheduleSlot>, StoreError> {
        self.conditional_update(seen, |current| current.after_increment()).await
    }

    async fn try_set_status(
        &self,
        seen: &ScheduleSlot,
        status: ScheduleStatus,
    ) -> Result<Option<ScheduleSlot>, StoreError> {
        self.conditional_update(seen, |current| Some(current.with_status(status))).await
    }
}
