pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;
pub mod supabase_store;

pub use models::*;
pub use router::{appointment_routes, AppointmentState};
pub use services::*;
pub use store::{AppointmentStore, InMemoryAppointmentStore};
pub use supabase_store::SupabaseAppointmentStore;
