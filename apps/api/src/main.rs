use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{
    AppointmentQueryService, AppointmentState, AppointmentStateMachine, AppointmentStore, InMemoryAppointmentStore,
    LoggingNotificationDispatcher, NoShowReclaimer, SupabaseAppointmentStore,
};
use performance_cell::{CacheBackend, CacheService, InMemoryCacheBackend, RedisCacheBackend};
use schedule_cell::{InMemoryQuotaStore, QuotaStore, ScheduleQuotaManager, SupabaseQuotaStore};
use security_cell::RateLimiter;
use shared_config::AppConfig;

use router::AppComponents;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic quota API server");

    let config = Arc::new(AppConfig::from_env());

    // Cache backend shared by read caches and rate limit counters
    let backend: Arc<dyn CacheBackend> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisCacheBackend::new(url)
                .await
                .context("failed to connect to Redis")?,
        ),
        None => Arc::new(InMemoryCacheBackend::new()),
    };
    let cache = Arc::new(CacheService::new(backend.clone()));

    let (quota_store, appointment_store): (Arc<dyn QuotaStore>, Arc<dyn AppointmentStore>) = if config.is_configured() {
        (
            Arc::new(SupabaseQuotaStore::new(&config)),
            Arc::new(SupabaseAppointmentStore::new(&config)),
        )
    } else {
        warn!("Supabase not configured, bookings are kept in memory only");
        (
            Arc::new(InMemoryQuotaStore::new()),
            Arc::new(InMemoryAppointmentStore::new()),
        )
    };

    let quota = Arc::new(ScheduleQuotaManager::new(&config, quota_store, cache.clone()));
    let machine = Arc::new(AppointmentStateMachine::new(
        &config,
        appointment_store.clone(),
        quota.clone(),
        cache.clone(),
        Arc::new(LoggingNotificationDispatcher),
    ));
    let reclaimer = Arc::new(NoShowReclaimer::new(
        &config,
        appointment_store.clone(),
        machine.invalidator(),
        machine.notifier(),
    ));
    let queries = Arc::new(AppointmentQueryService::new(&config, appointment_store, cache.clone()));

    let reclaimer_task = tokio::spawn(reclaimer.clone().run());

    let components = AppComponents {
        cache,
        quota,
        appointments: AppointmentState {
            machine,
            queries,
            reclaimer: reclaimer.clone(),
        },
        limiter: Arc::new(RateLimiter::new(backend)),
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(config.clone(), components)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    // Peer addresses feed the per-IP rate limit counters
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("server error")?;

    reclaimer.shutdown().await;
    reclaimer_task.abort();
    info!("Server stopped");
    Ok(())
}
