use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use rand::Rng;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use performance_cell::{CacheKeys, CacheService};
use shared_config::{AppConfig, BookingConfig, CacheConfig};

use crate::models::{PublishScheduleRequest, QuotaError, ScheduleSlot, ScheduleStatus};
use crate::store::{QuotaStore, StoreError};

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Take,
    Release,
    Status(ScheduleStatus),
}

/// Owns every write to a schedule slot's quota and status. Each write is a
/// version-guarded conditional update retried a bounded number of times;
/// successful writes invalidate the slot's cached views.
pub struct ScheduleQuotaManager {
    store: Arc<dyn QuotaStore>,
    cache: Arc<CacheService>,
    booking: BookingConfig,
    cache_config: CacheConfig,
}

impl ScheduleQuotaManager {
    pub fn new(config: &AppConfig, store: Arc<dyn QuotaStore>, cache: Arc<CacheService>) -> Self {
        Self {
            store,
            cache,
            booking: config.booking.clone(),
            cache_config: config.cache.clone(),
        }
    }

    pub fn store(&self) -> Arc<dyn QuotaStore> {
        Arc::clone(&self.store)
    }

    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id))]
    pub async fn publish_schedule(&self, request: PublishScheduleRequest) -> Result<ScheduleSlot, QuotaError> {
        if request.total_quota < 0 {
            return Err(QuotaError::Validation("total_quota must not be negative".to_string()));
        }
        if request.schedule_date < Local::now().date_naive() {
            return Err(QuotaError::Validation("schedule_date must not be in the past".to_string()));
        }

        let slot = ScheduleSlot::new(
            request.doctor_id,
            request.schedule_date,
            request.time_slot,
            request.total_quota,
        );

        let slot = match self.store.insert_slot(slot).await {
            Ok(slot) => slot,
            Err(StoreError::UniqueViolation(_)) => return Err(QuotaError::AlreadyPublished),
            Err(e) => return Err(e.into()),
        };

        self.cache
            .invalidate_pattern(&CacheKeys::doctor_schedule_list_pattern(slot.doctor_id))
            .await;

        info!(
            "Published schedule {} for {} {} with quota {}",
            slot.id, slot.schedule_date, slot.time_slot, slot.total_quota
        );
        Ok(slot)
    }

    /// Cached slot view. Never used to decide a booking.
    pub async fn get_slot(&self, slot_id: Uuid) -> Result<ScheduleSlot, QuotaError> {
        let key = CacheKeys::schedule_detail(slot_id);
        let ttl = Duration::from_secs(self.cache_config.detail_ttl_secs);
        self.cache.get_or_load(&key, ttl, || self.load_fresh(slot_id)).await
    }

    pub async fn list_doctor_slots(
        &self,
        doctor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleSlot>, QuotaError> {
        if from > to {
            return Err(QuotaError::Validation("from must not be after to".to_string()));
        }

        let key = CacheKeys::doctor_schedule_list(doctor_id, from, to);
        let ttl = Duration::from_secs(self.cache_config.doctor_list_ttl_secs);
        self.cache
            .get_or_load(&key, ttl, || async {
                Ok(self.store.list_doctor_slots(doctor_id, from, to).await?)
            })
            .await
    }

    /// Takes one unit of quota. Fails with `QuotaExhausted` or `SlotClosed`
    /// without retrying; retries only on a version conflict.
    #[instrument(skip(self))]
    pub async fn decrease_quota(&self, slot_id: Uuid) -> Result<ScheduleSlot, QuotaError> {
        self.apply_with_retry(slot_id, Mutation::Take).await
    }

    /// Releases one unit of quota. Allowed on closed slots, whose status
    /// stays closed.
    #[instrument(skip(self))]
    pub async fn increase_quota(&self, slot_id: Uuid) -> Result<ScheduleSlot, QuotaError> {
        self.apply_with_retry(slot_id, Mutation::Release).await
    }

    #[instrument(skip(self))]
    pub async fn close_slot(&self, slot_id: Uuid) -> Result<ScheduleSlot, QuotaError> {
        self.apply_with_retry(slot_id, Mutation::Status(ScheduleStatus::Closed)).await
    }

    /// Reopens a closed slot as open or full depending on remaining quota.
    #[instrument(skip(self))]
    pub async fn reopen_slot(&self, slot_id: Uuid) -> Result<ScheduleSlot, QuotaError> {
        self.apply_with_retry(slot_id, Mutation::Status(ScheduleStatus::Open)).await
    }

    async fn apply_with_retry(&self, slot_id: Uuid, mutation: Mutation) -> Result<ScheduleSlot, QuotaError> {
        let attempts = self.booking.max_quota_retries + 1;

        for attempt in 1..=attempts {
            let seen = self.load_fresh(slot_id).await?;
            if !Self::needs_write(&seen, mutation)? {
                return Ok(seen);
            }

            let written = match mutation {
                Mutation::Take => self.store.try_decrement(&seen).await?,
                Mutation::Release => self.store.try_increment(&seen).await?,
                Mutation::Status(status) => self.store.try_set_status(&seen, status).await?,
            };

            if let Some(updated) = written {
                debug!(
                    "Schedule {} {:?} applied at version {} (remaining {}/{})",
                    slot_id, mutation, updated.version, updated.remaining_quota, updated.total_quota
                );
                self.invalidate_views(&updated).await;
                return Ok(updated);
            }

            debug!("Version conflict on schedule {} (attempt {}/{})", slot_id, attempt, attempts);
            if attempt < attempts {
                self.backoff(attempt).await;
            }
        }

        // A final read tells a sold-out slot apart from one that simply kept moving.
        let latest = self.load_fresh(slot_id).await?;
        Self::needs_write(&latest, mutation)?;

        warn!("Gave up on schedule {} {:?} after {} attempts", slot_id, mutation, attempts);
        Err(QuotaError::RetriesExhausted { slot_id, attempts })
    }

    /// `Ok(false)` when the slot is already in the requested state.
    fn needs_write(slot: &ScheduleSlot, mutation: Mutation) -> Result<bool, QuotaError> {
        match mutation {
            Mutation::Take => {
                if slot.is_closed() {
                    return Err(QuotaError::SlotClosed(slot.id));
                }
                if slot.remaining_quota <= 0 {
                    return Err(QuotaError::QuotaExhausted(slot.id));
                }
                Ok(true)
            }
            Mutation::Release => {
                if slot.booked_quota <= 0 || slot.remaining_quota >= slot.total_quota {
                    return Err(QuotaError::NothingToRelease(slot.id));
                }
                Ok(true)
            }
            Mutation::Status(ScheduleStatus::Closed) => Ok(!slot.is_closed()),
            Mutation::Status(_) => Ok(slot.is_closed()),
        }
    }

    async fn load_fresh(&self, slot_id: Uuid) -> Result<ScheduleSlot, QuotaError> {
        self.store
            .find_slot(slot_id)
            .await?
            .ok_or(QuotaError::SlotNotFound(slot_id))
    }

    async fn invalidate_views(&self, slot: &ScheduleSlot) {
        let mut report = self.cache.invalidate(&[CacheKeys::schedule_detail(slot.id)]).await;
        report.merge(
            self.cache
                .invalidate_pattern(&CacheKeys::doctor_schedule_list_pattern(slot.doctor_id))
                .await,
        );
        if !report.is_clean() {
            warn!("Schedule {} cache views may be stale until TTL expiry", slot.id);
        }
    }

    async fn backoff(&self, attempt: u32) {
        let base = self.booking.retry_backoff_ms;
        if base == 0 {
            return;
        }
        let jitter = rand::thread_rng().gen_range(0..=base);
        tokio::time::sleep(Duration::from_millis(base * u64::from(attempt) + jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeSlot;
    use crate::store::InMemoryQuotaStore;
    use assert_matches::assert_matches;
    use chrono::Duration as ChronoDuration;
    use performance_cell::InMemoryCacheBackend;
    use shared_utils::test_utils::TestConfig;

    fn manager() -> ScheduleQuotaManager {
        let config = TestConfig::default().to_app_config();
        let cache = Arc::new(CacheService::new(Arc::new(InMemoryCacheBackend::new())));
        ScheduleQuotaManager::new(&config, Arc::new(InMemoryQuotaStore::new()), cache)
    }

    fn request(total_quota: i32) -> PublishScheduleRequest {
        PublishScheduleRequest {
            doctor_id: Uuid::new_v4(),
            schedule_date: Local::now().date_naive() + ChronoDuration::days(1),
            time_slot: TimeSlot::Morning,
            total_quota,
        }
    }

    #[tokio::test]
    async fn test_decrease_until_exhausted() {
        let manager = manager();
        let slot = manager.publish_schedule(request(2)).await.unwrap();

        manager.decrease_quota(slot.id).await.unwrap();
        let full = manager.decrease_quota(slot.id).await.unwrap();
        assert_eq!(full.status, ScheduleStatus::Full);
        assert_eq!(full.version, 2);

        assert_matches!(manager.decrease_quota(slot.id).await, Err(QuotaError::QuotaExhausted(id)) if id == slot.id);
    }

    #[tokio::test]
    async fn test_closed_slot_rejects_booking_but_releases_quota() {
        let manager = manager();
        let slot = manager.publish_schedule(request(3)).await.unwrap();
        manager.decrease_quota(slot.id).await.unwrap();
        manager.close_slot(slot.id).await.unwrap();

        assert_matches!(manager.decrease_quota(slot.id).await, Err(QuotaError::SlotClosed(_)));

        let released = manager.increase_quota(slot.id).await.unwrap();
        assert_eq!(released.status, ScheduleStatus::Closed);
        assert_eq!(released.remaining_quota, 3);

        let reopened = manager.reopen_slot(slot.id).await.unwrap();
        assert_eq!(reopened.status, ScheduleStatus::Open);
        manager.decrease_quota(slot.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let manager = manager();
        let slot = manager.publish_schedule(request(1)).await.unwrap();
        let first = manager.close_slot(slot.id).await.unwrap();
        let second = manager.close_slot(slot.id).await.unwrap();
        assert_eq!(first.version, second.version);
    }

    #[tokio::test]
    async fn test_release_without_booking_is_rejected() {
        let manager = manager();
        let slot = manager.publish_schedule(request(1)).await.unwrap();
        assert_matches!(manager.increase_quota(slot.id).await, Err(QuotaError::NothingToRelease(_)));
    }

    #[tokio::test]
    async fn test_publish_validation() {
        let manager = manager();
        assert_matches!(manager.publish_schedule(request(-1)).await, Err(QuotaError::Validation(_)));

        let mut past = request(1);
        past.schedule_date = Local::now().date_naive() - ChronoDuration::days(1);
        assert_matches!(manager.publish_schedule(past).await, Err(QuotaError::Validation(_)));

        let first = request(1);
        let again = first.clone();
        manager.publish_schedule(first).await.unwrap();
        assert_matches!(manager.publish_schedule(again).await, Err(QuotaError::AlreadyPublished));
    }

    #[tokio::test]
    async fn test_unknown_slot() {
        let manager = manager();
        let id = Uuid::new_v4();
        assert_matches!(manager.decrease_quota(id).await, Err(QuotaError::SlotNotFound(missing)) if missing == id);
    }
}
