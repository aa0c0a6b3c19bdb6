use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, RETURN_REPRESENTATION};

use crate::models::{ScheduleSlot, ScheduleStatus};
use crate::store::{QuotaStore, StoreError};

const SCHEDULES_PATH: &str = "/rest/v1/schedules";
const SLOT_ORDER: &str = "schedule_date.asc,slot_rank.asc";

/// [`QuotaStore`] over PostgREST. Conditional updates are filtered PATCHes
/// with `Prefer: return=representation`; an empty array means the filters
/// matched zero rows.
pub struct SupabaseQuotaStore {
    supabase: SupabaseClient,
}

impl SupabaseQuotaStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    async fn patch_slot(&self, filters: String, next: &ScheduleSlot) -> Result<Option<ScheduleSlot>, StoreError> {
        let path = format!("{}?{}", SCHEDULES_PATH, filters);
        let body = json!({
            "booked_quota": next.booked_quota,
            "remaining_quota": next.remaining_quota,
            "status": next.status,
            "version": next.version,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows: Vec<ScheduleSlot> = self
            .supabase
            .request_with_prefer(Method::PATCH, &path, None, Some(body), Some(RETURN_REPRESENTATION))
            .await?;

        if rows.is_empty() {
            debug!("Conditional update on schedule {} matched no rows", next.id);
        }
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl QuotaStore for SupabaseQuotaStore {
    async fn insert_slot(&self, slot: ScheduleSlot) -> Result<ScheduleSlot, StoreError> {
        let mut body = serde_json::to_value(&slot).map_err(|e| StoreError::Backend(e.to_string()))?;
        // The label sorts alphabetically; listings order by the stored rank.
        body["slot_rank"] = json!(slot.time_slot.rank());

        let rows: Vec<ScheduleSlot> = self
            .supabase
            .request_with_prefer(Method::POST, SCHEDULES_PATH, None, Some(body), Some(RETURN_REPRESENTATION))
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("Insert returned no schedule row".to_string()))
    }

    async fn find_slot(&self, id: Uuid) -> Result<Option<ScheduleSlot>, StoreError> {
        let path = format!("{}?id=eq.{}&select=*", SCHEDULES_PATH, id);
        let rows: Vec<ScheduleSlot> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_doctor_slots(
        &self,
        doctor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleSlot>, StoreError> {
        let path = format!(
            "{}?doctor_id=eq.{}&schedule_date=gte.{}&schedule_date=lte.{}&order={}",
            SCHEDULES_PATH, doctor_id, from, to, SLOT_ORDER
        );
        Ok(self.supabase.request(Method::GET, &path, None, None).await?)
    }

    async fn try_decrement(&self, seen: &ScheduleSlot) -> Result<Option<ScheduleSlot>, StoreError> {
        let Some(next) = seen.after_decrement() else {
            return Ok(None);
        };
        let filters = format!(
            "id=eq.{}&version=eq.{}&remaining_quota=gt.0&status=neq.closed",
            seen.id, seen.version
        );
        self.patch_slot(filters, &next).await
    }

    async fn try_increment(&self, seen: &ScheduleSlot) -> Result<Option<ScheduleSlot>, StoreError> {
        let Some(next) = seen.after_increment() else {
            return Ok(None);
        };
        let filters = format!("id=eq.{}&version=eq.{}&booked_quota=gt.0", seen.id, seen.version);
        self.patch_slot(filters, &next).await
    }

    async fn try_set_status(
        &self,
        seen: &ScheduleSlot,
        status: ScheduleStatus,
    ) -> Result<Option<ScheduleSlot>, StoreError> {
        let next = seen.with_status(status);
        let filters = format!("id=eq.{}&version=eq.{}", seen.id, seen.version);
        self.patch_slot(filters, &next).await
    }
}
