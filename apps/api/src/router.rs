use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use appointment_cell::services::scheduler::AppointmentScheduler;
use shared_config::AppConfig;

pub fn create_router(config: Arc<AppConfig>, scheduler: Arc<AppointmentScheduler>) -> Router {
    Router::new()
        .route("/", get(|| async { "Vet Clinic API is running!" }))
        .nest("/api/appointments", appointment_routes(config, scheduler))
}
