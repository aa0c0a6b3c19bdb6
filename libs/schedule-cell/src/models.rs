use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
}

impl TimeSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
        }
    }

    /// Position within the day. Persisted next to the label as `slot_rank` so
    /// storage-side ordering matches the in-process one.
    pub fn rank(&self) -> u8 {
        match self {
            TimeSlot::Morning => 0,
            TimeSlot::Afternoon => 1,
            TimeSlot::Evening => 2,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "morning" | "am" => Some(TimeSlot::Morning),
            "afternoon" | "pm" => Some(TimeSlot::Afternoon),
            "evening" | "night" => Some(TimeSlot::Evening),
            _ => None,
        }
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Stored rows may carry labels written by older clients. Anything
// unrecognised is read as the latest session of the day.
impl<'de> Deserialize<'de> for TimeSlot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(TimeSlot::from_label(&label).unwrap_or_else(|| {
            tracing::warn!("Unrecognized time slot label '{}', treating as evening", label);
            TimeSlot::Evening
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Open,
    Full,
    Closed,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleStatus::Open => write!(f, "open"),
            ScheduleStatus::Full => write!(f, "full"),
            ScheduleStatus::Closed => write!(f, "closed"),
        }
    }
}

/// One bookable (doctor, date, time slot) unit with a fixed quota.
///
/// `booked_quota + remaining_quota == total_quota` holds for every stored
/// row; `version` increases by exactly one on each successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub schedule_date: NaiveDate,
    pub time_slot: TimeSlot,
    pub total_quota: i32,
    pub booked_quota: i32,
    pub remaining_quota: i32,
    pub status: ScheduleStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleSlot {
    pub fn new(doctor_id: Uuid, schedule_date: NaiveDate, time_slot: TimeSlot, total_quota: i32) -> Self {
        let now = Utc::now();
        let mut slot = Self {
            id: Uuid::new_v4(),
            doctor_id,
            schedule_date,
            time_slot,
            total_quota,
            booked_quota: 0,
            remaining_quota: total_quota,
            status: ScheduleStatus::Open,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        slot.status = slot.derived_status();
        slot
    }

    /// Open/full follows the remaining quota; closed is only left by an
    /// explicit reopen.
    pub fn derived_status(&self) -> ScheduleStatus {
        match self.status {
            ScheduleStatus::Closed => ScheduleStatus::Closed,
            _ if self.remaining_quota <= 0 => ScheduleStatus::Full,
            _ => ScheduleStatus::Open,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.remaining_quota >= 0
            && self.remaining_quota <= self.total_quota
            && self.booked_quota + self.remaining_quota == self.total_quota
    }

    pub fn is_closed(&self) -> bool {
        self.status == ScheduleStatus::Closed
    }

    /// Row state after taking one unit of quota, or `None` when the guards
    /// of the conditional decrement reject it.
    pub fn after_decrement(&self) -> Option<ScheduleSlot> {
        if self.remaining_quota <= 0 || self.is_closed() {
            return None;
        }
        let mut next = self.clone();
        next.booked_quota += 1;
        next.remaining_quota -= 1;
        next.bump();
        Some(next)
    }

    /// Row state after releasing one unit of quota.
    pub fn after_increment(&self) -> Option<ScheduleSlot> {
        if self.booked_quota <= 0 || self.remaining_quota >= self.total_quota {
            return None;
        }
        let mut next = self.clone();
        next.booked_quota -= 1;
        next.remaining_quota += 1;
        next.bump();
        Some(next)
    }

    pub fn with_status(&self, status: ScheduleStatus) -> ScheduleSlot {
        let mut next = self.clone();
        next.status = status;
        next.bump();
        next
    }

    fn bump(&mut self) {
        self.status = self.derived_status();
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishScheduleRequest {
    pub doctor_id: Uuid,
    pub schedule_date: NaiveDate,
    pub time_slot: TimeSlot,
    pub total_quota: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleListQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Schedule slot not found: {0}")]
    SlotNotFound(Uuid),

    #[error("Schedule slot {0} is closed")]
    SlotClosed(Uuid),

    #[error("No remaining quota for schedule slot {0}")]
    QuotaExhausted(Uuid),

    #[error("Schedule slot {slot_id} kept changing, gave up after {attempts} attempts")]
    RetriesExhausted { slot_id: Uuid, attempts: u32 },

    #[error("Schedule slot {0} has no booked quota to release")]
    NothingToRelease(Uuid),

    #[error("A schedule already exists for this doctor, date and time slot")]
    AlreadyPublished,

    #[error("Invalid schedule: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
