// libs/appointment-cell/src/models.rs
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use schedule_cell::{QuotaError, StoreError, TimeSlot};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// One patient's claim on one unit of a schedule slot's quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
    pub appointment_date: NaiveDate,
    pub time_slot: TimeSlot,
    /// Position within (doctor, date, time slot); never reused.
    pub queue_number: i32,
    pub status: AppointmentStatus,
    pub version: i64,
    pub patient_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.patient_id.to_string() == user_id || self.doctor_id.to_string() == user_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingPayment,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::PendingPayment,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Statuses that still hold a unit of the slot's quota and can be cancelled.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::PendingPayment => "pending_payment",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events that move an appointment between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentAction {
    ConfirmPayment,
    Start,
    Complete,
    Cancel,
    MarkNoShow,
}

impl fmt::Display for AppointmentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppointmentAction::ConfirmPayment => "confirm_payment",
            AppointmentAction::Start => "start",
            AppointmentAction::Complete => "complete",
            AppointmentAction::Cancel => "cancel",
            AppointmentAction::MarkNoShow => "mark_no_show",
        };
        f.write_str(name)
    }
}

/// Highest queue number ever issued in a (doctor, date, time slot) tuple,
/// cancelled bookings included, alongside the count of bookings that still
/// hold their number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueuePosition {
    pub active_count: i32,
    pub highest_issued: i32,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub schedule_id: Uuid,
    pub patient_notes: Option<String>,
    /// Hold the booking in `pending_payment` until payment is confirmed.
    #[serde(default)]
    pub requires_payment: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub appointment: Appointment,
    /// False when the request was a no-op on an already terminal booking.
    pub changed: bool,
}

/// Store-level filter for listings. Results are ordered by date (newest
/// first), then time slot, then queue number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub statuses: Vec<AppointmentStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: u32,
    pub offset: u32,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&appointment.status))
            && self.date_from.map_or(true, |d| appointment.appointment_date >= d)
            && self.date_to.map_or(true, |d| appointment.appointment_date <= d)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub status: Option<AppointmentStatus>,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentPage {
    pub items: Vec<Appointment>,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientListKind {
    Pending,
    Today,
    Completed,
}

impl PatientListKind {
    pub const ALL: [PatientListKind; 3] = [PatientListKind::Pending, PatientListKind::Today, PatientListKind::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatientListKind::Pending => "pending",
            PatientListKind::Today => "today",
            PatientListKind::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoctorTodayStats {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub total: u32,
    pub pending: u32,
    pub in_progress: u32,
    pub completed: u32,
    pub no_show: u32,
    pub cancelled: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecentStats {
    pub patient_id: Uuid,
    pub total: u32,
    pub by_status: BTreeMap<AppointmentStatus, u32>,
    pub recent: Vec<Appointment>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Schedule slot not found")]
    ScheduleNotFound,

    #[error("No remaining quota on this schedule slot")]
    QuotaExhausted,

    #[error("Schedule slot is closed for booking")]
    SlotClosed,

    #[error("Patient already holds a booking on this schedule slot")]
    DuplicateBooking,

    #[error("Cannot {action} an appointment that is {from}")]
    StateConflict {
        from: AppointmentStatus,
        action: AppointmentAction,
    },

    #[error("The booking is busy, please retry")]
    RetryLater,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<QuotaError> for AppointmentError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::SlotNotFound(_) => AppointmentError::ScheduleNotFound,
            QuotaError::SlotClosed(_) => AppointmentError::SlotClosed,
            QuotaError::QuotaExhausted(_) => AppointmentError::QuotaExhausted,
            QuotaError::RetriesExhausted { .. } => AppointmentError::RetryLater,
            QuotaError::Store(e) => AppointmentError::Store(e),
            other => AppointmentError::Validation(other.to_string()),
        }
    }
}
