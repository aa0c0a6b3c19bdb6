// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, warn};

use schedule_cell::TimeSlot;
use shared_config::NoShowConfig;

use crate::models::{AppointmentAction, AppointmentError, AppointmentStatus};

/// Result of checking an action against the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    Apply(AppointmentStatus),
    /// Cancelling an already terminal booking.
    NoOp,
}

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    /// Statuses an action may start from.
    pub fn allowed_from(action: AppointmentAction) -> &'static [AppointmentStatus] {
        match action {
            AppointmentAction::ConfirmPayment => &[AppointmentStatus::PendingPayment],
            AppointmentAction::Start => &[AppointmentStatus::Confirmed],
            AppointmentAction::Complete => &[AppointmentStatus::InProgress],
            AppointmentAction::Cancel => &[
                AppointmentStatus::PendingPayment,
                AppointmentStatus::Confirmed,
                AppointmentStatus::InProgress,
            ],
            AppointmentAction::MarkNoShow => &[AppointmentStatus::Confirmed, AppointmentStatus::InProgress],
        }
    }

    pub fn target(action: AppointmentAction) -> AppointmentStatus {
        match action {
            AppointmentAction::ConfirmPayment => AppointmentStatus::Confirmed,
            AppointmentAction::Start => AppointmentStatus::InProgress,
            AppointmentAction::Complete => AppointmentStatus::Completed,
            AppointmentAction::Cancel => AppointmentStatus::Cancelled,
            AppointmentAction::MarkNoShow => AppointmentStatus::NoShow,
        }
    }

    pub fn validate_transition(
        current: AppointmentStatus,
        action: AppointmentAction,
    ) -> Result<TransitionCheck, AppointmentError> {
        if Self::allowed_from(action).contains(&current) {
            debug!("Transition validated: {} via {}", current, action);
            return Ok(TransitionCheck::Apply(Self::target(action)));
        }

        if action == AppointmentAction::Cancel && current.is_terminal() {
            return Ok(TransitionCheck::NoOp);
        }

        warn!("Invalid status transition attempted: {} via {}", current, action);
        Err(AppointmentError::StateConflict { from: current, action })
    }

    /// Every status reachable from `current` in one step.
    pub fn get_valid_transitions(current: AppointmentStatus) -> Vec<AppointmentStatus> {
        [
            AppointmentAction::ConfirmPayment,
            AppointmentAction::Start,
            AppointmentAction::Complete,
            AppointmentAction::Cancel,
            AppointmentAction::MarkNoShow,
        ]
        .into_iter()
        .filter(|action| Self::allowed_from(*action).contains(&current))
        .map(Self::target)
        .collect()
    }
}

/// Wall-clock end of each time slot, after which an unattended booking is a no-show.
#[derive(Debug, Clone, Copy)]
pub struct NoShowCutoffs {
    pub morning: NaiveTime,
    pub afternoon: NaiveTime,
    pub evening: NaiveTime,
}

impl NoShowCutoffs {
    pub fn from_config(config: &NoShowConfig) -> Self {
        Self {
            morning: config.morning_cutoff,
            afternoon: config.afternoon_cutoff,
            evening: config.evening_cutoff,
        }
    }

    pub fn cutoff(&self, time_slot: TimeSlot) -> NaiveTime {
        match time_slot {
            TimeSlot::Morning => self.morning,
            TimeSlot::Afternoon => self.afternoon,
            TimeSlot::Evening => self.evening,
        }
    }

    /// Cutoff for a raw stored label; unknown labels get the evening cutoff.
    pub fn cutoff_for_label(&self, label: &str) -> NaiveTime {
        TimeSlot::from_label(label).map_or(self.evening, |slot| self.cutoff(slot))
    }

    pub fn window_end(&self, date: NaiveDate, time_slot: TimeSlot) -> NaiveDateTime {
        date.and_time(self.cutoff(time_slot))
    }

    pub fn is_elapsed(&self, date: NaiveDate, time_slot: TimeSlot, now: NaiveDateTime) -> bool {
        now > self.window_end(date, time_slot)
    }
}

impl Default for NoShowCutoffs {
    fn default() -> Self {
        Self::from_config(&NoShowConfig::default())
    }
}
