// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::scheduler::AppointmentScheduler;

pub fn appointment_routes(config: Arc<AppConfig>, scheduler: Arc<AppointmentScheduler>) -> Router {
    // Every appointment operation requires a valid staff token
    let protected_routes = Router::new()
        .route(
            "/",
            get(handlers::list_appointments).post(handlers::create_appointment),
        )
        // Availability
        .route("/slots", get(handlers::get_available_slots))
        .route("/slots/check", get(handlers::check_slot))
        .route("/calendar", get(handlers::get_calendar))
        .route("/doctors/{doctor_id}/week", get(handlers::get_weekly_schedule))
        // Single appointment lifecycle
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment).delete(handlers::cancel_appointment),
        )
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/reschedule", post(handlers::reschedule_appointment))
        .route("/{appointment_id}/complete", post(handlers::complete_appointment))
        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(scheduler)
}
