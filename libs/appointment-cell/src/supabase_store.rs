use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use schedule_cell::{StoreError, TimeSlot};
use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, RETURN_REPRESENTATION};

use crate::models::{Appointment, AppointmentFilter, AppointmentStatus, QueuePosition};
use crate::store::AppointmentStore;

const APPOINTMENTS_PATH: &str = "/rest/v1/appointments";
const LISTING_ORDER: &str = "appointment_date.desc,slot_rank.asc,queue_number.asc,created_at.asc";

#[derive(Debug, Deserialize)]
struct QueueRow {
    queue_number: i32,
    status: AppointmentStatus,
}

fn status_list(statuses: &[AppointmentStatus]) -> String {
    let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    format!("in.({})", names.join(","))
}

/// [`AppointmentStore`] backed by the `appointments` table through PostgREST.
/// The unique index on `(doctor_id, appointment_date, time_slot, queue_number)`
/// and the partial unique index on `(patient_id, schedule_id)` over
/// non-terminal statuses both surface as HTTP 409.
pub struct SupabaseAppointmentStore {
    supabase: SupabaseClient,
}

impl SupabaseAppointmentStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    async fn get_rows(&self, query: String) -> Result<Vec<Appointment>, StoreError> {
        let path = format!("{}?{}", APPOINTMENTS_PATH, query);
        Ok(self.supabase.request(Method::GET, &path, None, None).await?)
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut body = serde_json::to_value(&appointment).map_err(|e| StoreError::Backend(e.to_string()))?;
        body["slot_rank"] = json!(appointment.time_slot.rank());

        let rows: Vec<Appointment> = self
            .supabase
            .request_with_prefer(Method::POST, APPOINTMENTS_PATH, None, Some(body), Some(RETURN_REPRESENTATION))
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("Insert returned no appointment row".to_string()))
    }

    async fn find(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.get_rows(format!("id=eq.{}&select=*", id)).await?.into_iter().next())
    }

    async fn queue_position(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time_slot: TimeSlot,
    ) -> Result<QueuePosition, StoreError> {
        let path = format!(
            "{}?doctor_id=eq.{}&appointment_date=eq.{}&time_slot=eq.{}&select=queue_number,status",
            APPOINTMENTS_PATH, doctor_id, date, time_slot
        );
        let rows: Vec<QueueRow> = self.supabase.request(Method::GET, &path, None, None).await?;

        Ok(rows.iter().fold(QueuePosition::default(), |mut position, row| {
            position.highest_issued = position.highest_issued.max(row.queue_number);
            if row.status != AppointmentStatus::Cancelled {
                position.active_count += 1;
            }
            position
        }))
    }

    async fn find_open_booking(&self, patient_id: Uuid, schedule_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let open: Vec<AppointmentStatus> = AppointmentStatus::ALL.into_iter().filter(|s| s.is_open()).collect();
        let query = format!(
            "patient_id=eq.{}&schedule_id=eq.{}&status={}&limit=1",
            patient_id,
            schedule_id,
            status_list(&open)
        );
        Ok(self.get_rows(query).await?.into_iter().next())
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
        expected_version: i64,
        reason: Option<String>,
    ) -> Result<Option<Appointment>, StoreError> {
        let path = format!(
            "{}?id=eq.{}&version=eq.{}&status={}",
            APPOINTMENTS_PATH,
            id,
            expected_version,
            status_list(from)
        );

        let mut body = json!({
            "status": to,
            "version": expected_version + 1,
            "updated_at": Utc::now().to_rfc3339(),
        });
        if let Some(reason) = reason {
            body["cancellation_reason"] = json!(reason);
        }

        let rows: Vec<Appointment> = self
            .supabase
            .request_with_prefer(Method::PATCH, &path, None, Some(body), Some(RETURN_REPRESENTATION))
            .await?;

        if rows.is_empty() {
            debug!("Status update {} -> {} matched no rows", id, to);
        }
        Ok(rows.into_iter().next())
    }

    async fn list_no_show_candidates(&self, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        let query = format!(
            "status={}&appointment_date=lte.{}&order={}",
            status_list(&[AppointmentStatus::Confirmed, AppointmentStatus::InProgress]),
            date,
            LISTING_ORDER
        );
        self.get_rows(query).await
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError> {
        let mut params = vec![format!("order={}", LISTING_ORDER)];

        if let Some(doctor_id) = filter.doctor_id {
            params.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(patient_id) = filter.patient_id {
            params.push(format!("patient_id=eq.{}", patient_id));
        }
        if !filter.statuses.is_empty() {
            params.push(format!("status={}", status_list(&filter.statuses)));
        }
        if let Some(from) = filter.date_from {
            params.push(format!("appointment_date=gte.{}", from));
        }
        if let Some(to) = filter.date_to {
            params.push(format!("appointment_date=lte.{}", to));
        }
        if filter.limit > 0 {
            params.push(format!("limit={}", filter.limit));
        }
        if filter.offset > 0 {
            params.push(format!("offset={}", filter.offset));
        }

        self.get_rows(params.join("&")).await
    }
}
