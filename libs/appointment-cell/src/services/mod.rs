pub mod booking;
pub mod cache_coherence;
pub mod lifecycle;
pub mod notification;
pub mod query;
pub mod queue_number;
pub mod reclaimer;

pub use booking::AppointmentStateMachine;
pub use cache_coherence::AppointmentCacheInvalidator;
pub use lifecycle::{AppointmentLifecycleService, NoShowCutoffs, TransitionCheck};
pub use notification::{BookingEvent, LoggingNotificationDispatcher, NotificationDispatcher, NotificationError};
pub use query::AppointmentQueryService;
pub use queue_number::QueueNumberAllocator;
pub use reclaimer::NoShowReclaimer;
