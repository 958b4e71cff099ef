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

use appointment_cell::models::SchedulingRules;
use appointment_cell::services::clock::{ClinicClock, SystemClock};
use appointment_cell::services::memory::InMemoryClinic;
use appointment_cell::services::scheduler::AppointmentScheduler;
use appointment_cell::services::supabase_store::SupabaseClinic;
use shared_config::{AppConfig, StorageBackend};
use shared_database::supabase::SupabaseClient;

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

    info!("Starting Vet Clinic API server");

    // Load configuration
    let config = AppConfig::from_env();
    let scheduler = build_scheduler(&config).context("failed to set up appointment scheduler")?;

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let port = config.port;
    let app = router::create_router(Arc::new(config), Arc::new(scheduler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn build_scheduler(config: &AppConfig) -> anyhow::Result<AppointmentScheduler> {
    let clock = ClinicClock::with_timezone_name(Arc::new(SystemClock), &config.clinic_timezone)?;
    let rules = SchedulingRules::from_config(config);
    info!(
        "Clinic time zone {}, {}-minute slots, cancellation fee {:.2}",
        clock.timezone().name(),
        rules.slot_interval_minutes,
        rules.cancellation_fee
    );

    let scheduler = match config.storage_backend {
        StorageBackend::Supabase => {
            if !config.is_supabase_configured() {
                anyhow::bail!("STORAGE_BACKEND=supabase requires SUPABASE_URL and SUPABASE_ANON_PUBLIC_KEY");
            }
            info!("Using Supabase storage at {}", config.supabase_url);
            let client = Arc::new(SupabaseClient::new(config));
            AppointmentScheduler::with_store(Arc::new(SupabaseClinic::new(client)), clock, rules)?
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage seeded with demo data; nothing is persisted");
            AppointmentScheduler::with_store(Arc::new(InMemoryClinic::demo()), clock, rules)?
        }
    };

    Ok(scheduler)
}
