// =====================================================================================
// POSTGREST APPOINTMENT STORE
// =====================================================================================

use assert_matches::assert_matches;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use std::sync::Arc;

use appointment_cell::{
    Appointment, AppointmentError, AppointmentFilter, AppointmentStatus, AppointmentStore, QueueNumberAllocator,
    QueuePosition, SupabaseAppointmentStore,
};
use schedule_cell::{StoreError, TimeSlot};
use shared_utils::test_utils::TestConfig;

fn appointment(status: AppointmentStatus, version: i64) -> Appointment {
    let now = Utc::now();
    Appointment {
        id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        schedule_id: Uuid::new_v4(),
        appointment_date: NaiveDate::from_ymd_opt(2030, 6, 3).unwrap(),
        time_slot: TimeSlot::Afternoon,
        queue_number: 4,
        status,
        version,
        patient_notes: None,
        cancellation_reason: None,
        created_at: now,
        updated_at: now,
    }
}

fn store_for(server: &MockServer) -> SupabaseAppointmentStore {
    SupabaseAppointmentStore::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config())
}

#[tokio::test]
async fn test_status_update_is_guarded_by_status_and_version() {
    let server = MockServer::start().await;
    let row = appointment(AppointmentStatus::Confirmed, 2);
    let mut updated = row.clone();
    updated.status = AppointmentStatus::Cancelled;
    updated.version = 3;
    updated.cancellation_reason = Some("sick".to_string());

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", row.id)))
        .and(query_param("version", "eq.2"))
        .and(query_param("status", "in.(pending_payment,confirmed)"))
        .and(header("prefer", "return=representation"))
        .and(body_partial_json(json!({
            "status": "cancelled",
            "version": 3,
            "cancellation_reason": "sick",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([updated])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let written = store
        .update_status(
            row.id,
            &[AppointmentStatus::PendingPayment, AppointmentStatus::Confirmed],
            AppointmentStatus::Cancelled,
            2,
            Some("sick".to_string()),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(written.status, AppointmentStatus::Cancelled);
    assert_eq!(written.version, 3);
}

#[tokio::test]
async fn test_status_update_matching_nothing_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let written = store
        .update_status(Uuid::new_v4(), &[AppointmentStatus::Confirmed], AppointmentStatus::NoShow, 0, None)
        .await
        .unwrap();
    assert!(written.is_none());
}

#[tokio::test]
async fn test_queue_position_counts_every_issued_number() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("appointment_date", "eq.2030-06-03"))
        .and(query_param("time_slot", "eq.morning"))
        .and(query_param("select", "queue_number,status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "queue_number": 1, "status": "completed" },
            { "queue_number": 2, "status": "cancelled" },
            { "queue_number": 3, "status": "confirmed" },
        ])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let position = store
        .queue_position(doctor_id, NaiveDate::from_ymd_opt(2030, 6, 3).unwrap(), TimeSlot::Morning)
        .await
        .unwrap();
    assert_eq!(position, QueuePosition { active_count: 2, highest_issued: 3 });
}

#[tokio::test]
async fn test_insert_stores_slot_rank_for_ordering() {
    let server = MockServer::start().await;
    let row = appointment(AppointmentStatus::Confirmed, 0);

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "time_slot": "afternoon", "slot_rank": 1 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row.clone()])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let stored = store.insert(row.clone()).await.unwrap();
    assert_eq!(stored.id, row.id);
}

#[tokio::test]
async fn test_queue_number_clash_is_unique_violation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key value violates unique constraint"))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_matches!(
        store.insert(appointment(AppointmentStatus::Confirmed, 0)).await,
        Err(StoreError::UniqueViolation(_))
    );
}

#[tokio::test]
async fn test_open_booking_index_conflict_is_a_duplicate() {
    let server = MockServer::start().await;
    let existing = appointment(AppointmentStatus::Confirmed, 0);
    let mut draft = appointment(AppointmentStatus::Confirmed, 0);
    draft.patient_id = existing.patient_id;
    draft.schedule_id = existing.schedule_id;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("select", "queue_number,status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key value violates unique constraint"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", existing.patient_id)))
        .and(query_param("schedule_id", format!("eq.{}", existing.schedule_id)))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
        .expect(1)
        .mount(&server)
        .await;

    let allocator = QueueNumberAllocator::new(Arc::new(store_for(&server)), 5);
    assert_matches!(allocator.allocate_and_insert(draft).await, Err(AppointmentError::DuplicateBooking));
}

#[tokio::test]
async fn test_no_show_candidates_and_filtered_listing() {
    let server = MockServer::start().await;
    let row = appointment(AppointmentStatus::Confirmed, 0);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "in.(confirmed,in_progress)"))
        .and(query_param("appointment_date", "lte.2030-06-03"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row.clone()])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", row.doctor_id)))
        .and(query_param("limit", "11"))
        .and(query_param("offset", "10"))
        .and(query_param("order", "appointment_date.desc,slot_rank.asc,queue_number.asc,created_at.asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row.clone()])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let due = store
        .list_no_show_candidates(NaiveDate::from_ymd_opt(2030, 6, 3).unwrap())
        .await
        .unwrap();
    assert_eq!(due.len(), 1);

    let filter = AppointmentFilter {
        doctor_id: Some(row.doctor_id),
        limit: 11,
        offset: 10,
        ..AppointmentFilter::default()
    };
    let page = store.list(&filter).await.unwrap();
    assert_eq!(page[0].id, row.id);
}
