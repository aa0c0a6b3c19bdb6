pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;
pub mod supabase_store;

pub use models::*;
pub use router::schedule_routes;
pub use services::quota::ScheduleQuotaManager;
pub use store::{InMemoryQuotaStore, QuotaStore, StoreError};
pub use supabase_store::SupabaseQuotaStore;
