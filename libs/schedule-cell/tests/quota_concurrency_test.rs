// =====================================================================================
// SCHEDULE QUOTA UNDER CONTENTION
// =====================================================================================

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Local};
use futures::future::join_all;
use uuid::Uuid;

use performance_cell::{CacheKeys, CacheService, InMemoryCacheBackend};
use schedule_cell::{
    InMemoryQuotaStore, PublishScheduleRequest, QuotaError, ScheduleQuotaManager, ScheduleStatus, TimeSlot,
};
use shared_utils::test_utils::TestConfig;

struct Fixture {
    manager: Arc<ScheduleQuotaManager>,
    backend: Arc<InMemoryCacheBackend>,
    cache: Arc<CacheService>,
}

fn fixture(max_quota_retries: u32) -> Fixture {
    let mut config = TestConfig::default().to_app_config();
    config.booking.max_quota_retries = max_quota_retries;

    let backend = Arc::new(InMemoryCacheBackend::new());
    let cache = Arc::new(CacheService::new(backend.clone()));
    let manager = Arc::new(ScheduleQuotaManager::new(
        &config,
        Arc::new(InMemoryQuotaStore::new()),
        cache.clone(),
    ));

    Fixture { manager, backend, cache }
}

fn tomorrow(doctor_id: Uuid, total_quota: i32) -> PublishScheduleRequest {
    PublishScheduleRequest {
        doctor_id,
        schedule_date: Local::now().date_naive() + Duration::days(1),
        time_slot: TimeSlot::Afternoon,
        total_quota,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_unit_goes_to_exactly_one_of_two_requests() {
    let fx = fixture(3);
    let slot = fx.manager.publish_schedule(tomorrow(Uuid::new_v4(), 1)).await.unwrap();

    let a = tokio::spawn({
        let manager = fx.manager.clone();
        async move { manager.decrease_quota(slot.id).await }
    });
    let b = tokio::spawn({
        let manager = fx.manager.clone();
        async move { manager.decrease_quota(slot.id).await }
    });

    let results = vec![a.await.unwrap(), b.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);

    let loser = results.into_iter().find(|r| r.is_err()).unwrap();
    assert_matches!(loser, Err(QuotaError::QuotaExhausted(_)));

    let stored = fx.manager.store().find_slot(slot.id).await.unwrap().unwrap();
    assert_eq!(stored.remaining_quota, 0);
    assert_eq!(stored.booked_quota, 1);
    assert_eq!(stored.status, ScheduleStatus::Full);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_never_oversells_under_contention() {
    const TOTAL: i32 = 5;
    const REQUESTS: usize = 24;

    // Every failed conditional update means another request won, so
    // TOTAL retries are always enough to reach a definite answer.
    let fx = fixture(TOTAL as u32);
    let slot = fx.manager.publish_schedule(tomorrow(Uuid::new_v4(), TOTAL)).await.unwrap();

    let handles = (0..REQUESTS).map(|_| {
        let manager = fx.manager.clone();
        tokio::spawn(async move { manager.decrease_quota(slot.id).await })
    });

    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, TOTAL as usize);
    for failure in results.iter().filter(|r| r.is_err()) {
        assert_matches!(failure, Err(QuotaError::QuotaExhausted(_)));
    }

    // Each success observed a distinct version.
    let mut versions: Vec<i64> = results.iter().filter_map(|r| r.as_ref().ok()).map(|s| s.version).collect();
    versions.sort_unstable();
    versions.dedup();
    assert_eq!(versions.len(), TOTAL as usize);

    let stored = fx.manager.store().find_slot(slot.id).await.unwrap().unwrap();
    assert!(stored.is_consistent());
    assert_eq!(stored.remaining_quota, 0);
    assert_eq!(stored.version, i64::from(TOTAL));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_release_and_take_keep_totals_consistent() {
    let fx = fixture(16);
    let slot = fx.manager.publish_schedule(tomorrow(Uuid::new_v4(), 6)).await.unwrap();
    for _ in 0..3 {
        fx.manager.decrease_quota(slot.id).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..6 {
        let manager = fx.manager.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                manager.increase_quota(slot.id).await
            } else {
                manager.decrease_quota(slot.id).await
            }
        }));
    }
    for handle in join_all(handles).await {
        handle.unwrap().unwrap();
    }

    let stored = fx.manager.store().find_slot(slot.id).await.unwrap().unwrap();
    assert!(stored.is_consistent());
    assert_eq!(stored.booked_quota, 3);
    assert_eq!(stored.version, 3 + 6);
}

#[tokio::test]
async fn test_successful_write_invalidates_schedule_views() {
    let fx = fixture(3);
    let doctor_id = Uuid::new_v4();
    let request = tomorrow(doctor_id, 2);
    let date = request.schedule_date;
    let slot = fx.manager.publish_schedule(request).await.unwrap();

    // Warm both views.
    fx.manager.get_slot(slot.id).await.unwrap();
    let listed = fx.manager.list_doctor_slots(doctor_id, date, date).await.unwrap();
    assert_eq!(listed[0].remaining_quota, 2);

    let detail_key = CacheKeys::schedule_detail(slot.id);
    let list_key = CacheKeys::doctor_schedule_list(doctor_id, date, date);
    assert!(fx.backend.contains(&detail_key).await);
    assert!(fx.backend.contains(&list_key).await);

    fx.manager.decrease_quota(slot.id).await.unwrap();

    assert!(!fx.backend.contains(&detail_key).await);
    assert!(!fx.backend.contains(&list_key).await);

    let listed = fx.manager.list_doctor_slots(doctor_id, date, date).await.unwrap();
    assert_eq!(listed[0].remaining_quota, 1);
    assert_eq!(fx.manager.get_slot(slot.id).await.unwrap().remaining_quota, 1);
}

#[tokio::test]
async fn test_cache_outage_does_not_block_quota_writes() {
    let fx = fixture(3);
    let slot = fx.manager.publish_schedule(tomorrow(Uuid::new_v4(), 2)).await.unwrap();

    fx.backend.set_unavailable(true);
    let updated = fx.manager.decrease_quota(slot.id).await.unwrap();
    assert_eq!(updated.remaining_quota, 1);
    assert!(fx.cache.stats().invalidation_failures > 0);

    // Reads fall through to storage.
    assert_eq!(fx.manager.get_slot(slot.id).await.unwrap().remaining_quota, 1);
}
