// =====================================================================================
// BOOKING LIFECYCLE - QUOTA, QUEUE NUMBERS AND CACHE COHERENCE
// =====================================================================================

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{Duration as ChronoDuration, Local};
use futures::future::join_all;
use uuid::Uuid;

use appointment_cell::{
    AppointmentAction, AppointmentError, AppointmentStateMachine, AppointmentStatus, BookAppointmentRequest,
    InMemoryAppointmentStore, LoggingNotificationDispatcher,
};
use performance_cell::{CacheKeys, CacheService, InMemoryCacheBackend};
use schedule_cell::{InMemoryQuotaStore, PublishScheduleRequest, ScheduleQuotaManager, ScheduleSlot, TimeSlot};
use shared_utils::test_utils::TestConfig;

struct Fixture {
    machine: Arc<AppointmentStateMachine>,
    quota: Arc<ScheduleQuotaManager>,
    backend: Arc<InMemoryCacheBackend>,
    cache: Arc<CacheService>,
}

fn fixture(retries: u32) -> Fixture {
    let mut config = TestConfig::default().to_app_config();
    config.booking.max_quota_retries = retries;
    config.booking.max_queue_number_retries = retries;

    let backend = Arc::new(InMemoryCacheBackend::new());
    let cache = Arc::new(CacheService::new(backend.clone()));
    let quota = Arc::new(ScheduleQuotaManager::new(&config, Arc::new(InMemoryQuotaStore::new()), cache.clone()));
    let machine = Arc::new(AppointmentStateMachine::new(
        &config,
        Arc::new(InMemoryAppointmentStore::new()),
        quota.clone(),
        cache.clone(),
        Arc::new(LoggingNotificationDispatcher),
    ));

    Fixture { machine, quota, backend, cache }
}

async fn publish(fx: &Fixture, total_quota: i32) -> ScheduleSlot {
    fx.quota
        .publish_schedule(PublishScheduleRequest {
            doctor_id: Uuid::new_v4(),
            schedule_date: Local::now().date_naive() + ChronoDuration::days(1),
            time_slot: TimeSlot::Morning,
            total_quota,
        })
        .await
        .unwrap()
}

fn request(schedule_id: Uuid) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id: Uuid::new_v4(),
        schedule_id,
        patient_notes: Some("fever".to_string()),
        requires_payment: false,
    }
}

async fn remaining(fx: &Fixture, slot_id: Uuid) -> i32 {
    fx.quota.store().find_slot(slot_id).await.unwrap().unwrap().remaining_quota
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_unit_is_booked_once() {
    let fx = fixture(3);
    let slot = publish(&fx, 1).await;

    let handles = (0..2).map(|_| {
        let machine = fx.machine.clone();
        tokio::spawn(async move { machine.book(request(slot.id)).await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    let booked: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].queue_number, 1);
    assert_matches!(results.iter().find(|r| r.is_err()), Some(Err(AppointmentError::QuotaExhausted)));
    assert_eq!(remaining(&fx, slot.id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contended_bookings_get_dense_unique_queue_numbers() {
    const TOTAL: i32 = 5;
    const REQUESTS: usize = 16;

    let fx = fixture(TOTAL as u32);
    let slot = publish(&fx, TOTAL).await;

    let handles = (0..REQUESTS).map(|_| {
        let machine = fx.machine.clone();
        tokio::spawn(async move { machine.book(request(slot.id)).await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    let mut numbers: Vec<i32> = results.iter().filter_map(|r| r.as_ref().ok()).map(|a| a.queue_number).collect();
    numbers.sort();
    assert_eq!(numbers, (1..=TOTAL).collect::<Vec<_>>());

    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, AppointmentError::QuotaExhausted);
    }

    let stored = fx.quota.store().find_slot(slot.id).await.unwrap().unwrap();
    assert_eq!(stored.remaining_quota, 0);
    assert_eq!(stored.booked_quota, TOTAL);
    assert!(stored.is_consistent());
}

#[tokio::test]
async fn test_cancel_returns_quota_once() {
    let fx = fixture(3);
    let slot = publish(&fx, 3).await;
    let booked = fx.machine.book(request(slot.id)).await.unwrap();
    assert_eq!(remaining(&fx, slot.id).await, 2);

    let first = fx.machine.cancel(booked.id, Some("travelling".to_string())).await.unwrap();
    assert!(first.changed);
    assert_eq!(first.appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(first.appointment.cancellation_reason.as_deref(), Some("travelling"));
    assert_eq!(remaining(&fx, slot.id).await, 3);

    let second = fx.machine.cancel(booked.id, None).await.unwrap();
    assert!(!second.changed);
    assert_eq!(remaining(&fx, slot.id).await, 3);
}

#[tokio::test]
async fn test_rebooking_after_cancel_gets_a_fresh_number() {
    let fx = fixture(3);
    let slot = publish(&fx, 2).await;

    let first = fx.machine.book(request(slot.id)).await.unwrap();
    let second = fx.machine.book(request(slot.id)).await.unwrap();
    assert_eq!((first.queue_number, second.queue_number), (1, 2));
    assert_matches!(fx.machine.book(request(slot.id)).await, Err(AppointmentError::QuotaExhausted));

    fx.machine.cancel(first.id, None).await.unwrap();
    let again = fx.machine.book(request(slot.id)).await.unwrap();
    assert_eq!(again.queue_number, 3);
    assert_eq!(remaining(&fx, slot.id).await, 0);
}

#[tokio::test]
async fn test_duplicate_booking_is_rejected_without_taking_quota() {
    let fx = fixture(3);
    let slot = publish(&fx, 3).await;
    let req = request(slot.id);

    fx.machine.book(req.clone()).await.unwrap();
    assert_matches!(fx.machine.book(req).await, Err(AppointmentError::DuplicateBooking));
    assert_eq!(remaining(&fx, slot.id).await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_from_one_patient_take_one_unit() {
    let fx = fixture(3);
    let slot = publish(&fx, 5).await;
    let req = request(slot.id);

    let handles = (0..8).map(|_| {
        let machine = fx.machine.clone();
        let req = req.clone();
        tokio::spawn(async move { machine.book(req).await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, AppointmentError::DuplicateBooking);
    }
    assert_eq!(remaining(&fx, slot.id).await, 4);
}

#[tokio::test]
async fn test_closed_slot_and_unknown_slot() {
    let fx = fixture(3);
    let slot = publish(&fx, 3).await;
    fx.quota.close_slot(slot.id).await.unwrap();

    assert_matches!(fx.machine.book(request(slot.id)).await, Err(AppointmentError::SlotClosed));
    assert_matches!(
        fx.machine.book(request(Uuid::new_v4())).await,
        Err(AppointmentError::ScheduleNotFound)
    );
    assert_eq!(remaining(&fx, slot.id).await, 3);
}

#[tokio::test]
async fn test_completed_booking_cannot_be_completed_again_and_keeps_quota() {
    let fx = fixture(3);
    let slot = publish(&fx, 2).await;
    let booked = fx.machine.book(request(slot.id)).await.unwrap();

    fx.machine.start(booked.id).await.unwrap();
    let done = fx.machine.complete(booked.id).await.unwrap();
    assert_eq!(done.appointment.status, AppointmentStatus::Completed);
    assert_eq!(remaining(&fx, slot.id).await, 1);

    assert_matches!(
        fx.machine.complete(booked.id).await,
        Err(AppointmentError::StateConflict { from: AppointmentStatus::Completed, action: AppointmentAction::Complete })
    );

    // Cancelling a finished visit is a no-op and gives nothing back
    let cancel = fx.machine.cancel(booked.id, None).await.unwrap();
    assert!(!cancel.changed);
    assert_eq!(remaining(&fx, slot.id).await, 1);
}

#[tokio::test]
async fn test_cancelled_booking_cannot_start() {
    let fx = fixture(3);
    let slot = publish(&fx, 2).await;
    let booked = fx.machine.book(request(slot.id)).await.unwrap();
    fx.machine.cancel(booked.id, None).await.unwrap();

    assert_matches!(
        fx.machine.start(booked.id).await,
        Err(AppointmentError::StateConflict { from: AppointmentStatus::Cancelled, action: AppointmentAction::Start })
    );
    assert_matches!(fx.machine.start(Uuid::new_v4()).await, Err(AppointmentError::NotFound));
}

#[tokio::test]
async fn test_transition_drops_cached_views() {
    let fx = fixture(3);
    let slot = publish(&fx, 2).await;
    let booked = fx.machine.book(request(slot.id)).await.unwrap();

    let detail_key = CacheKeys::appointment_detail(booked.id);
    let cached = fx.machine.get_appointment(booked.id).await.unwrap();
    assert_eq!(cached.status, AppointmentStatus::Confirmed);
    assert!(fx.backend.contains(&detail_key).await);

    let stats_key = CacheKeys::doctor_today_stats(booked.doctor_id, booked.appointment_date);
    fx.cache.put_json(&stats_key, &"stale", Duration::from_secs(60)).await;

    fx.machine.start(booked.id).await.unwrap();
    assert!(!fx.backend.contains(&detail_key).await);
    assert!(!fx.backend.contains(&stats_key).await);

    let fresh = fx.machine.get_appointment(booked.id).await.unwrap();
    assert_eq!(fresh.status, AppointmentStatus::InProgress);
}

#[tokio::test]
async fn test_cache_outage_does_not_block_booking() {
    let fx = fixture(3);
    let slot = publish(&fx, 2).await;
    fx.backend.set_unavailable(true);

    let booked = fx.machine.book(request(slot.id)).await.unwrap();
    let cancelled = fx.machine.cancel(booked.id, None).await.unwrap();
    assert!(cancelled.changed);
    assert_eq!(remaining(&fx, slot.id).await, 2);
}
