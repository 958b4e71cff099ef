// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    clinic_datetime, AppointmentFilter, AppointmentStatus, CompleteAppointmentRequest,
    CreateAppointmentRequest, RescheduleAppointmentRequest, DEFAULT_PAGE_LIMIT,
};
use crate::services::scheduler::AppointmentScheduler;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AppointmentQueryParams {
    pub doctor_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct SlotCheckQuery {
    pub doctor_id: Uuid,
    #[serde(deserialize_with = "clinic_datetime::deserialize")]
    pub scheduled_at: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct WeekQuery {
    pub start_date: NaiveDate,
}

// ==============================================================================
// READ HANDLERS
// ==============================================================================

pub async fn list_appointments(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    query_result: Result<Query<AppointmentQueryParams>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(params) = query_result?;
    let filter = AppointmentFilter {
        doctor_id: params.doctor_id,
        client_id: params.client_id,
        status: params.status,
        date: params.date,
        limit: params.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        offset: params.offset.unwrap_or(0),
    };

    let page = scheduler.list(filter).await?;
    Ok(Json(json!(page)))
}

pub async fn get_appointment(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = scheduler.get_appointment(appointment_id).await?;
    Ok(Json(json!(appointment)))
}

pub async fn get_available_slots(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    query_result: Result<Query<SlotsQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query_result?;
    let slots = scheduler.suggest_slots(query.doctor_id, query.date).await?;
    Ok(Json(json!(slots)))
}

pub async fn check_slot(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    query_result: Result<Query<SlotCheckQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query_result?;
    let check = scheduler
        .check_slot(query.doctor_id, query.scheduled_at)
        .await?;
    Ok(Json(json!(check)))
}

pub async fn get_calendar(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    query_result: Result<Query<CalendarQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query_result?;
    let calendar = scheduler
        .calendar_view(query.start_date, query.end_date, query.doctor_id)
        .await?;
    Ok(Json(json!(calendar)))
}

pub async fn get_weekly_schedule(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    Path(doctor_id): Path<Uuid>,
    query_result: Result<Query<WeekQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query_result?;
    let schedule = scheduler
        .weekly_schedule(doctor_id, query.start_date)
        .await?;
    Ok(Json(json!(schedule)))
}

// ==============================================================================
// STATE TRANSITION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    Extension(user): Extension<User>,
    payload: Result<Json<CreateAppointmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(request) = payload?;
    let appointment = scheduler.create(request).await?;
    info!(
        "User {} booked appointment {}",
        user.id, appointment.details.appointment.id
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment": appointment,
            "message": "Appointment booked successfully"
        })),
    ))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let cancelled = scheduler.cancel(appointment_id).await?;
    info!("User {} cancelled appointment {}", user.id, appointment_id);

    let message = if cancelled.has_fee {
        format!("Appointment cancelled, a fee of {:.2} applies", cancelled.fee)
    } else {
        "Appointment cancelled".to_string()
    };

    Ok(Json(json!({
        "success": true,
        "appointment": cancelled,
        "message": message
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    payload: Result<Json<RescheduleAppointmentRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = payload?;
    let appointment = scheduler
        .reschedule(appointment_id, request.scheduled_at)
        .await?;
    info!("User {} rescheduled appointment {}", user.id, appointment_id);

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    payload: Result<Option<Json<CompleteAppointmentRequest>>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let notes = payload?.and_then(|Json(body)| body.notes);
    let appointment = scheduler.complete(appointment_id, notes).await?;
    info!("User {} completed appointment {}", user.id, appointment_id);

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment completed"
    })))
}
