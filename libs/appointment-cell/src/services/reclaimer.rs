use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use schedule_cell::TimeSlot;
use shared_config::AppConfig;

use crate::models::{AppointmentError, AppointmentStatus, SweepReport};
use crate::services::cache_coherence::AppointmentCacheInvalidator;
use crate::services::lifecycle::NoShowCutoffs;
use crate::services::notification::{dispatch, BookingEvent, NotificationDispatcher};
use crate::store::AppointmentStore;

const NO_SHOW_FROM: [AppointmentStatus; 2] = [AppointmentStatus::Confirmed, AppointmentStatus::InProgress];

/// Periodic sweep that marks confirmed or in-progress bookings as no-show
/// once their slot's window has ended. The slot's quota is not returned.
pub struct NoShowReclaimer {
    store: Arc<dyn AppointmentStore>,
    invalidator: Arc<AppointmentCacheInvalidator>,
    notifier: Arc<dyn NotificationDispatcher>,
    cutoffs: NoShowCutoffs,
    interval: Duration,
    is_shutdown: RwLock<bool>,
}

impl NoShowReclaimer {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn AppointmentStore>,
        invalidator: Arc<AppointmentCacheInvalidator>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            invalidator,
            notifier,
            cutoffs: NoShowCutoffs::from_config(&config.no_show),
            interval: Duration::from_secs(config.no_show.sweep_interval_secs.max(1)),
            is_shutdown: RwLock::new(false),
        }
    }

    pub fn window_end(&self, date: NaiveDate, time_slot: TimeSlot) -> NaiveDateTime {
        self.cutoffs.window_end(date, time_slot)
    }

    /// Sweeps against the local wall clock.
    pub async fn sweep(&self) -> Result<SweepReport, AppointmentError> {
        self.sweep_at(Local::now().naive_local()).await
    }

    /// Each booking is handled on its own; a failure is counted and the
    /// sweep moves on. Running twice in one window changes nothing the
    /// second time.
    #[instrument(skip(self))]
    pub async fn sweep_at(&self, now: NaiveDateTime) -> Result<SweepReport, AppointmentError> {
        let candidates = self.store.list_no_show_candidates(now.date()).await?;
        let mut report = SweepReport::default();

        for appointment in candidates {
            report.scanned += 1;

            if !self.cutoffs.is_elapsed(appointment.appointment_date, appointment.time_slot, now) {
                report.skipped += 1;
                continue;
            }

            let result = self
                .store
                .update_status(appointment.id, &NO_SHOW_FROM, AppointmentStatus::NoShow, appointment.version, None)
                .await;

            match result {
                Ok(Some(updated)) => {
                    report.updated += 1;
                    self.invalidator.on_booking_changed(&updated).await;
                    dispatch(&self.notifier, BookingEvent::for_patient(&updated));
                }
                Ok(None) => {
                    debug!("Appointment {} changed since it was listed, leaving it", appointment.id);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to mark appointment {} as no-show: {}", appointment.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "No-show sweep finished: scanned={} updated={} skipped={} failed={}",
            report.scanned, report.updated, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Sweeps on every interval tick until [`NoShowReclaimer::shutdown`].
    pub async fn run(self: Arc<Self>) {
        info!("Starting no-show reclaimer every {}s", self.interval.as_secs());
        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;

            if *self.is_shutdown.read().await {
                break;
            }

            if let Err(e) = self.sweep().await {
                error!("No-show sweep could not list candidates: {}", e);
            }
        }

        info!("No-show reclaimer stopped");
    }

    pub async fn shutdown(&self) {
        *self.is_shutdown.write().await = true;
    }
}
