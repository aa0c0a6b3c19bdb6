use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingEvent {
    pub appointment_id: Uuid,
    pub recipient_id: Uuid,
    pub status: AppointmentStatus,
    pub queue_number: i32,
}

impl BookingEvent {
    pub fn for_patient(appointment: &Appointment) -> Self {
        Self {
            appointment_id: appointment.id,
            recipient_id: appointment.patient_id,
            status: appointment.status,
            queue_number: appointment.queue_number,
        }
    }
}

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, event: BookingEvent) -> Result<(), NotificationError>;
}

/// Dispatcher that only records the event in the log.
#[derive(Debug, Default)]
pub struct LoggingNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingNotificationDispatcher {
    async fn notify(&self, event: BookingEvent) -> Result<(), NotificationError> {
        info!(
            "Notify {} about appointment {} ({}, queue number {})",
            event.recipient_id, event.appointment_id, event.status, event.queue_number
        );
        Ok(())
    }
}

/// Fire-and-forget: the caller's transition never waits on delivery.
pub fn dispatch(dispatcher: &Arc<dyn NotificationDispatcher>, event: BookingEvent) {
    let dispatcher = Arc::clone(dispatcher);
    tokio::spawn(async move {
        let appointment_id = event.appointment_id;
        if let Err(e) = dispatcher.notify(event).await {
            warn!("Notification for appointment {} failed: {}", appointment_id, e);
        }
    });
}
