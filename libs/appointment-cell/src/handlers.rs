use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use shared_models::{auth::User, error::AppError};

use crate::models::{
    AdminListQuery, Appointment, AppointmentError, BookAppointmentRequest, CancelAppointmentRequest,
    PatientListKind, TransitionOutcome,
};
use crate::router::AppointmentState;

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound | AppointmentError::ScheduleNotFound => AppError::NotFound(err.to_string()),
            AppointmentError::QuotaExhausted => AppError::conflict("quota_exhausted", err.to_string()),
            AppointmentError::SlotClosed => AppError::conflict("slot_closed", err.to_string()),
            AppointmentError::DuplicateBooking => AppError::conflict("duplicate_booking", err.to_string()),
            AppointmentError::StateConflict { .. } => AppError::conflict("state_conflict", err.to_string()),
            AppointmentError::RetryLater => AppError::ServiceUnavailable(err.to_string()),
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PatientListParams {
    pub kind: Option<PatientListKind>,
}

// ==============================================================================
// ACCESS CHECKS
// ==============================================================================

fn is_self(user: &User, id: Uuid) -> bool {
    user.id == id.to_string()
}

fn ensure_admin(user: &User) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin access required".to_string()))
    }
}

fn ensure_participant(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if user.is_admin() || appointment.is_participant(&user.id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to access this appointment".to_string()))
    }
}

/// The treating doctor or an admin drives the visit itself.
fn ensure_treating_doctor(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if user.is_admin() || (user.is_doctor() && is_self(user, appointment.doctor_id)) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Only the treating doctor can do this".to_string()))
    }
}

fn ensure_doctor_or_admin(user: &User, doctor_id: Uuid) -> Result<(), AppError> {
    if user.is_admin() || (user.is_doctor() && is_self(user, doctor_id)) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to view this doctor's appointments".to_string()))
    }
}

fn ensure_patient_or_admin(user: &User, patient_id: Uuid) -> Result<(), AppError> {
    if user.is_admin() || is_self(user, patient_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to view this patient's appointments".to_string()))
    }
}

fn outcome_response(outcome: TransitionOutcome) -> Json<Value> {
    Json(json!({
        "success": true,
        "changed": outcome.changed,
        "appointment": outcome.appointment,
    }))
}

// ==============================================================================
// BOOKING LIFECYCLE
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if !(user.is_admin() || is_self(&user, request.patient_id)) {
        return Err(AppError::Forbidden("Patients can only book for themselves".to_string()));
    }

    let appointment = state.machine.book(request).await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "appointment": appointment,
        "queue_number": appointment.queue_number,
    }))))
}

pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.machine.get_appointment(appointment_id).await?;
    ensure_participant(&user, &appointment)?;
    Ok(Json(json!(appointment)))
}

pub async fn confirm_payment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.machine.get_appointment(appointment_id).await?;
    ensure_participant(&user, &appointment)?;

    let outcome = state.machine.confirm_payment(appointment_id).await?;
    Ok(outcome_response(outcome))
}

pub async fn start_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.machine.get_appointment(appointment_id).await?;
    ensure_treating_doctor(&user, &appointment)?;

    let outcome = state.machine.start(appointment_id).await?;
    Ok(outcome_response(outcome))
}

pub async fn complete_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.machine.get_appointment(appointment_id).await?;
    ensure_treating_doctor(&user, &appointment)?;

    let outcome = state.machine.complete(appointment_id).await?;
    Ok(outcome_response(outcome))
}

pub async fn mark_no_show(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.machine.get_appointment(appointment_id).await?;
    ensure_treating_doctor(&user, &appointment)?;

    let outcome = state.machine.mark_no_show(appointment_id).await?;
    Ok(outcome_response(outcome))
}

pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    request: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.machine.get_appointment(appointment_id).await?;
    ensure_participant(&user, &appointment)?;

    let reason = request.and_then(|Json(body)| body.reason);
    let outcome = state.machine.cancel(appointment_id, reason).await?;
    Ok(outcome_response(outcome))
}

// ==============================================================================
// READ VIEWS
// ==============================================================================

pub async fn admin_list_appointments(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<Value>, AppError> {
    ensure_admin(&user)?;
    let page = state.queries.admin_list(query).await?;
    Ok(Json(json!(page)))
}

pub async fn doctor_patient_list(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Query(params): Query<PatientListParams>,
) -> Result<Json<Value>, AppError> {
    ensure_doctor_or_admin(&user, doctor_id)?;

    let kind = params.kind.unwrap_or(PatientListKind::Today);
    let appointments = state
        .queries
        .doctor_patient_list(doctor_id, kind, Local::now().date_naive())
        .await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "kind": kind,
        "total": appointments.len(),
        "appointments": appointments,
    })))
}

pub async fn doctor_today_stats(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_doctor_or_admin(&user, doctor_id)?;
    let stats = state
        .queries
        .doctor_today_stats(doctor_id, Local::now().date_naive())
        .await?;
    Ok(Json(json!(stats)))
}

pub async fn patient_appointments(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_patient_or_admin(&user, patient_id)?;
    let appointments = state.queries.patient_appointments(patient_id).await?;
    Ok(Json(json!({
        "patient_id": patient_id,
        "total": appointments.len(),
        "appointments": appointments,
    })))
}

pub async fn patient_recent_stats(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_patient_or_admin(&user, patient_id)?;
    let stats = state.queries.patient_recent_stats(patient_id).await?;
    Ok(Json(json!(stats)))
}

// ==============================================================================
// MAINTENANCE
// ==============================================================================

/// Runs one no-show sweep immediately instead of waiting for the next tick.
pub async fn run_no_show_sweep(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    ensure_admin(&user)?;

    let report = state.reclaimer.sweep().await.map_err(|e| {
        warn!("Manual no-show sweep failed: {}", e);
        AppError::from(e)
    })?;

    Ok(Json(json!({ "success": true, "report": report })))
}

