use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{Duration, Local};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::{auth::User, error::AppError};

use crate::models::{PublishScheduleRequest, QuotaError, ScheduleListQuery};
use crate::services::ScheduleQuotaManager;

/// Listing window used when the caller gives no `to` date.
const DEFAULT_LIST_DAYS: i64 = 14;

impl From<QuotaError> for AppError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::SlotNotFound(_) => AppError::NotFound(err.to_string()),
            QuotaError::SlotClosed(_) => AppError::conflict("slot_closed", err.to_string()),
            QuotaError::QuotaExhausted(_) => AppError::conflict("quota_exhausted", err.to_string()),
            QuotaError::NothingToRelease(_) => AppError::conflict("nothing_to_release", err.to_string()),
            QuotaError::AlreadyPublished => AppError::conflict("schedule_exists", err.to_string()),
            QuotaError::RetriesExhausted { .. } => AppError::ServiceUnavailable(err.to_string()),
            QuotaError::Validation(msg) => AppError::ValidationError(msg),
            QuotaError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}

fn ensure_can_manage(user: &User, doctor_id: Uuid) -> Result<(), AppError> {
    let is_own_schedule = user.is_doctor() && user.id == doctor_id.to_string();
    if user.is_admin() || is_own_schedule {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to manage this doctor's schedule".to_string()))
    }
}

#[axum::debug_handler]
pub async fn publish_schedule(
    State(manager): State<Arc<ScheduleQuotaManager>>,
    Extension(user): Extension<User>,
    Json(request): Json<PublishScheduleRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    ensure_can_manage(&user, request.doctor_id)?;

    let slot = manager.publish_schedule(request).await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "schedule": slot,
    }))))
}

pub async fn get_schedule(
    State(manager): State<Arc<ScheduleQuotaManager>>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let slot = manager.get_slot(schedule_id).await?;
    Ok(Json(json!(slot)))
}

pub async fn list_doctor_schedules(
    State(manager): State<Arc<ScheduleQuotaManager>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<ScheduleListQuery>,
) -> Result<Json<Value>, AppError> {
    let from = query.from.unwrap_or_else(|| Local::now().date_naive());
    let to = query.to.unwrap_or(from + Duration::days(DEFAULT_LIST_DAYS - 1));

    let slots = manager.list_doctor_slots(doctor_id, from, to).await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "from": from,
        "to": to,
        "total": slots.len(),
        "schedules": slots,
    })))
}

pub async fn close_schedule(
    State(manager): State<Arc<ScheduleQuotaManager>>,
    Extension(user): Extension<User>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let slot = manager.get_slot(schedule_id).await?;
    ensure_can_manage(&user, slot.doctor_id)?;

    let closed = manager.close_slot(schedule_id).await?;
    Ok(Json(json!({ "success": true, "schedule": closed })))
}

pub async fn reopen_schedule(
    State(manager): State<Arc<ScheduleQuotaManager>>,
    Extension(user): Extension<User>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let slot = manager.get_slot(schedule_id).await?;
    ensure_can_manage(&user, slot.doctor_id)?;

    let reopened = manager.reopen_slot(schedule_id).await?;
    Ok(Json(json!({ "success": true, "schedule": reopened })))
}
