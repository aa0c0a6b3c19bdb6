// =====================================================================================
// NO-SHOW RECLAIMER - WINDOW CUTOFFS, IDEMPOTENCE AND FAILURE ISOLATION
// =====================================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use appointment_cell::{
    Appointment, AppointmentCacheInvalidator, AppointmentFilter, AppointmentStatus, AppointmentStore,
    InMemoryAppointmentStore, LoggingNotificationDispatcher, NoShowReclaimer, QueuePosition, SweepReport,
};
use performance_cell::{CacheKeys, CacheService, InMemoryCacheBackend};
use schedule_cell::{StoreError, TimeSlot};
use shared_utils::test_utils::TestConfig;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 6, 3).unwrap()
}

fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    date.and_hms_opt(h, m, 0).unwrap()
}

fn booking(date: NaiveDate, time_slot: TimeSlot, queue_number: i32, status: AppointmentStatus) -> Appointment {
    let now = Utc::now();
    Appointment {
        id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        schedule_id: Uuid::new_v4(),
        appointment_date: date,
        time_slot,
        queue_number,
        status,
        version: 0,
        patient_notes: None,
        cancellation_reason: None,
        created_at: now,
        updated_at: now,
    }
}

struct Fixture {
    store: Arc<InMemoryAppointmentStore>,
    backend: Arc<InMemoryCacheBackend>,
    reclaimer: Arc<NoShowReclaimer>,
}

fn fixture_with(store: Arc<dyn AppointmentStore>, rows: Arc<InMemoryAppointmentStore>) -> Fixture {
    let config = TestConfig::default().to_app_config();
    let backend = Arc::new(InMemoryCacheBackend::new());
    let cache = Arc::new(CacheService::new(backend.clone()));
    let reclaimer = Arc::new(NoShowReclaimer::new(
        &config,
        store,
        Arc::new(AppointmentCacheInvalidator::new(cache)),
        Arc::new(LoggingNotificationDispatcher),
    ));
    Fixture { store: rows, backend, reclaimer }
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryAppointmentStore::new());
    fixture_with(store.clone(), store)
}

async fn status_of(store: &InMemoryAppointmentStore, id: Uuid) -> AppointmentStatus {
    store.find(id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_marks_elapsed_bookings_only() {
    let fx = fixture();
    let yesterday = day().pred_opt().unwrap();

    let missed_morning = fx.store.insert(booking(day(), TimeSlot::Morning, 1, AppointmentStatus::Confirmed)).await.unwrap();
    let stuck_visit = fx.store.insert(booking(day(), TimeSlot::Morning, 2, AppointmentStatus::InProgress)).await.unwrap();
    let unpaid = fx.store.insert(booking(day(), TimeSlot::Morning, 3, AppointmentStatus::PendingPayment)).await.unwrap();
    let afternoon = fx.store.insert(booking(day(), TimeSlot::Afternoon, 1, AppointmentStatus::Confirmed)).await.unwrap();
    let last_night = fx.store.insert(booking(yesterday, TimeSlot::Evening, 1, AppointmentStatus::Confirmed)).await.unwrap();
    let finished = fx.store.insert(booking(yesterday, TimeSlot::Morning, 1, AppointmentStatus::Completed)).await.unwrap();

    let report = fx.reclaimer.sweep_at(at(day(), 12, 30)).await.unwrap();
    assert_eq!(report, SweepReport { scanned: 4, updated: 3, skipped: 1, failed: 0 });

    assert_eq!(status_of(&fx.store, missed_morning.id).await, AppointmentStatus::NoShow);
    assert_eq!(status_of(&fx.store, stuck_visit.id).await, AppointmentStatus::NoShow);
    assert_eq!(status_of(&fx.store, last_night.id).await, AppointmentStatus::NoShow);
    assert_eq!(status_of(&fx.store, unpaid.id).await, AppointmentStatus::PendingPayment);
    assert_eq!(status_of(&fx.store, afternoon.id).await, AppointmentStatus::Confirmed);
    assert_eq!(status_of(&fx.store, finished.id).await, AppointmentStatus::Completed);
}

#[tokio::test]
async fn test_cutoff_is_exclusive() {
    let fx = fixture();
    let evening = fx.store.insert(booking(day(), TimeSlot::Evening, 1, AppointmentStatus::Confirmed)).await.unwrap();

    let before = fx.reclaimer.sweep_at(at(day(), 21, 59)).await.unwrap();
    assert_eq!(before.updated, 0);
    let exactly = fx.reclaimer.sweep_at(at(day(), 22, 0)).await.unwrap();
    assert_eq!(exactly.updated, 0);
    assert_eq!(status_of(&fx.store, evening.id).await, AppointmentStatus::Confirmed);

    let after = fx.reclaimer.sweep_at(at(day(), 22, 1)).await.unwrap();
    assert_eq!(after.updated, 1);
    assert_eq!(
        fx.reclaimer.window_end(day(), TimeSlot::Evening),
        at(day(), 22, 0)
    );
}

#[tokio::test]
async fn test_second_sweep_changes_nothing() {
    let fx = fixture();
    let row = fx.store.insert(booking(day(), TimeSlot::Morning, 1, AppointmentStatus::Confirmed)).await.unwrap();

    let first = fx.reclaimer.sweep_at(at(day(), 23, 0)).await.unwrap();
    assert_eq!(first.updated, 1);
    let version = fx.store.find(row.id).await.unwrap().unwrap().version;

    let second = fx.reclaimer.sweep_at(at(day(), 23, 5)).await.unwrap();
    assert_eq!(second, SweepReport::default());
    assert_eq!(fx.store.find(row.id).await.unwrap().unwrap().version, version);
}

#[tokio::test]
async fn test_marked_booking_views_are_invalidated() {
    let fx = fixture();
    let row = fx.store.insert(booking(day(), TimeSlot::Morning, 1, AppointmentStatus::Confirmed)).await.unwrap();

    let key = CacheKeys::appointment_detail(row.id);
    let cache = CacheService::new(fx.backend.clone());
    cache.put_json(&key, &row, Duration::from_secs(60)).await;

    fx.reclaimer.sweep_at(at(day(), 13, 0)).await.unwrap();
    assert!(!fx.backend.contains(&key).await);
}

/// Delegates to the in-memory store but fails status writes for chosen rows.
struct FlakyStore {
    inner: Arc<InMemoryAppointmentStore>,
    failing: HashSet<Uuid>,
}

#[async_trait]
impl AppointmentStore for FlakyStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.inner.insert(appointment).await
    }

    async fn find(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.inner.find(id).await
    }

    async fn queue_position(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time_slot: TimeSlot,
    ) -> Result<QueuePosition, StoreError> {
        self.inner.queue_position(doctor_id, date, time_slot).await
    }

    async fn find_open_booking(&self, patient_id: Uuid, schedule_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.inner.find_open_booking(patient_id, schedule_id).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
        expected_version: i64,
        reason: Option<String>,
    ) -> Result<Option<Appointment>, StoreError> {
        if self.failing.contains(&id) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.inner.update_status(id, from, to, expected_version, reason).await
    }

    async fn list_no_show_candidates(&self, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        self.inner.list_no_show_candidates(date).await
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError> {
        self.inner.list(filter).await
    }
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_sweep() {
    let rows = Arc::new(InMemoryAppointmentStore::new());
    let broken = rows.insert(booking(day(), TimeSlot::Morning, 1, AppointmentStatus::Confirmed)).await.unwrap();
    let healthy = rows.insert(booking(day(), TimeSlot::Morning, 2, AppointmentStatus::Confirmed)).await.unwrap();

    let flaky = Arc::new(FlakyStore {
        inner: rows.clone(),
        failing: HashSet::from([broken.id]),
    });
    let fx = fixture_with(flaky, rows);

    let report = fx.reclaimer.sweep_at(at(day(), 18, 0)).await.unwrap();
    assert_eq!(report, SweepReport { scanned: 2, updated: 1, skipped: 0, failed: 1 });
    assert_eq!(status_of(&fx.store, healthy.id).await, AppointmentStatus::NoShow);
    assert_eq!(status_of(&fx.store, broken.id).await, AppointmentStatus::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn test_run_sweeps_until_shutdown() {
    let fx = fixture();
    let long_ago = NaiveDate::from_ymd_opt(2020, 1, 6).unwrap();
    let row = fx.store.insert(booking(long_ago, TimeSlot::Afternoon, 1, AppointmentStatus::Confirmed)).await.unwrap();

    let handle = tokio::spawn(fx.reclaimer.clone().run());

    // The first tick fires immediately
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(status_of(&fx.store, row.id).await, AppointmentStatus::NoShow);

    fx.reclaimer.shutdown().await;
    tokio::time::timeout(Duration::from_secs(3600), handle)
        .await
        .expect("reclaimer did not stop")
        .unwrap();
}
