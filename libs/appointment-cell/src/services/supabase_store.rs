use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{
    Appointment, AppointmentDetails, AppointmentError, AppointmentFilter, AppointmentStatus,
    BookedInterval, DayOfWeek, Doctor, NewAppointment, Pet, WorkingInterval,
};
use crate::services::ledger::{BookingLedger, SLOT_CONFLICT_MESSAGE};
use crate::services::records::RecordStore;
use crate::services::working_hours::WorkingHoursProvider;

const APPOINTMENT_SELECT: &str = "*,\
pet:pets(name,species,breed),\
client:clients(first_name,last_name,phone,email),\
doctor:doctors(first_name,last_name,specialization)";
const DOCTOR_SELECT: &str = "id,first_name,last_name,specialization,is_active";
const PET_SELECT: &str = "id,client_id,name,species,breed";

// Postgres SQLSTATE codes surfaced in PostgREST error bodies.
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Deserialize)]
struct PetEmbed {
    name: String,
    species: String,
    breed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientEmbed {
    first_name: String,
    last_name: String,
    phone: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DoctorEmbed {
    first_name: String,
    last_name: String,
    specialization: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AppointmentRow {
    #[serde(flatten)]
    appointment: Appointment,
    pet: PetEmbed,
    client: ClientEmbed,
    doctor: DoctorEmbed,
}

impl From<AppointmentRow> for AppointmentDetails {
    fn from(row: AppointmentRow) -> Self {
        Self {
            appointment: row.appointment,
            pet_name: row.pet.name,
            pet_species: row.pet.species,
            pet_breed: row.pet.breed,
            client_name: format!("{} {}", row.client.first_name, row.client.last_name),
            client_phone: row.client.phone,
            client_email: row.client.email,
            doctor_name: format!("{} {}", row.doctor.first_name, row.doctor.last_name),
            doctor_specialization: row.doctor.specialization,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkingHoursRow {
    day_of_week: DayOfWeek,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

#[derive(Debug, Deserialize)]
struct StartRow {
    scheduled_at: NaiveDateTime,
}

/// Clinic store backed by Supabase/PostgREST. Double-booking is rejected by
/// the partial unique index on `appointments (doctor_id, scheduled_at)`.
pub struct SupabaseClinic {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseClinic {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch_details(&self, query: String) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?select={}&{}",
            urlencoding::encode(APPOINTMENT_SELECT),
            query
        );
        let rows: Vec<AppointmentRow> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;
        Ok(rows.into_iter().map(AppointmentDetails::from).collect())
    }

    /// Conditional PATCH; true when at least one row matched.
    async fn patch_scheduled(&self, filter: String, body: Value) -> Result<bool, AppointmentError> {
        let path = format!("/rest/v1/appointments?{}&status=eq.scheduled", filter);
        let rows: Vec<Value> = self
            .supabase
            .write_returning(Method::PATCH, &path, body)
            .await
            .map_err(write_error)?;
        Ok(!rows.is_empty())
    }
}

fn timestamp(at: NaiveDateTime) -> String {
    urlencoding::encode(&at.format("%Y-%m-%dT%H:%M:%S").to_string()).into_owned()
}

/// Half-open `scheduled_at` filter covering whole days `start..=end`.
fn day_range(start: NaiveDate, end: NaiveDate) -> Result<String, AppointmentError> {
    let from = start.and_time(NaiveTime::MIN);
    let until = end
        .checked_add_days(Days::new(1))
        .ok_or_else(|| AppointmentError::Validation(format!("date {} is out of range", end)))?
        .and_time(NaiveTime::MIN);
    Ok(format!(
        "scheduled_at=gte.{}&scheduled_at=lt.{}",
        timestamp(from),
        timestamp(until)
    ))
}

fn storage_error(err: SupabaseError) -> AppointmentError {
    error!("Supabase request failed: {}", err);
    AppointmentError::Storage(err.to_string())
}

fn write_error(err: SupabaseError) -> AppointmentError {
    match err {
        SupabaseError::Conflict(body) if body.contains(UNIQUE_VIOLATION) => {
            warn!("Unique index rejected booking: {}", body);
            AppointmentError::SlotConflict(SLOT_CONFLICT_MESSAGE.to_string())
        }
        SupabaseError::Conflict(body) if body.contains(FOREIGN_KEY_VIOLATION) => {
            warn!("Foreign key rejected booking: {}", body);
            AppointmentError::InvalidReference(
                "Referenced client, pet or doctor does not exist".to_string(),
            )
        }
        other => storage_error(other),
    }
}

#[async_trait]
impl RecordStore for SupabaseClinic {
    async fn find_pet_owned_by_client(
        &self,
        pet_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<Pet>, AppointmentError> {
        let path = format!(
            "/rest/v1/pets?id=eq.{}&client_id=eq.{}&select={}",
            pet_id, client_id, PET_SELECT
        );
        let pets: Vec<Pet> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;
        Ok(pets.into_iter().next())
    }

    async fn find_active_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, AppointmentError> {
        let path = format!(
            "/rest/v1/doctors?id=eq.{}&is_active=eq.true&select={}",
            doctor_id, DOCTOR_SELECT
        );
        let doctors: Vec<Doctor> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;
        Ok(doctors.into_iter().next())
    }

    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, AppointmentError> {
        let path = format!("/rest/v1/doctors?id=eq.{}&select={}", doctor_id, DOCTOR_SELECT);
        let doctors: Vec<Doctor> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;
        Ok(doctors.into_iter().next())
    }
}

#[async_trait]
impl WorkingHoursProvider for SupabaseClinic {
    async fn get(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<WorkingInterval>, AppointmentError> {
        let day = DayOfWeek::from_date(date);
        let path = format!(
            "/rest/v1/working_hours?doctor_id=eq.{}&day_of_week=eq.{}&select=day_of_week,start_time,end_time",
            doctor_id, day
        );
        let rows: Vec<WorkingHoursRow> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;

        if rows.len() > 1 {
            warn!(
                "Doctor {} has {} working-hours rows for {}, using the first",
                doctor_id,
                rows.len(),
                day
            );
        }
        Ok(rows.into_iter().next().map(|row| WorkingInterval {
            start_time: row.start_time,
            end_time: row.end_time,
        }))
    }

    async fn weekly(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<(DayOfWeek, WorkingInterval)>, AppointmentError> {
        let path = format!(
            "/rest/v1/working_hours?doctor_id=eq.{}&select=day_of_week,start_time,end_time",
            doctor_id
        );
        let rows: Vec<WorkingHoursRow> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;

        let mut week: Vec<(DayOfWeek, WorkingInterval)> = rows
            .into_iter()
            .map(|row| {
                (
                    row.day_of_week,
                    WorkingInterval {
                        start_time: row.start_time,
                        end_time: row.end_time,
                    },
                )
            })
            .collect();
        week.sort_by_key(|(day, _)| day.index());
        week.dedup_by_key(|(day, _)| *day);
        Ok(week)
    }
}

#[async_trait]
impl BookingLedger for SupabaseClinic {
    async fn find(&self, id: Uuid) -> Result<Option<AppointmentDetails>, AppointmentError> {
        debug!("Fetching appointment {}", id);
        Ok(self
            .fetch_details(format!("id=eq.{}", id))
            .await?
            .into_iter()
            .next())
    }

    async fn list(
        &self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let mut query_parts = Vec::new();
        if let Some(doctor_id) = filter.doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(client_id) = filter.client_id {
            query_parts.push(format!("client_id=eq.{}", client_id));
        }
        if let Some(status) = filter.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(date) = filter.date {
            query_parts.push(day_range(date, date)?);
        }
        query_parts.push("order=scheduled_at.asc".to_string());
        query_parts.push(format!("limit={}", filter.limit));
        query_parts.push(format!("offset={}", filter.offset));

        self.fetch_details(query_parts.join("&")).await
    }

    async fn in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        doctor_id: Option<Uuid>,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let mut query = day_range(start, end)?;
        if let Some(doctor_id) = doctor_id {
            query.push_str(&format!("&doctor_id=eq.{}", doctor_id));
        }
        query.push_str("&order=scheduled_at.asc");
        self.fetch_details(query).await
    }

    async fn booked_intervals(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<BookedInterval>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?select=scheduled_at,duration_minutes&doctor_id=eq.{}&status=neq.cancelled&{}&order=scheduled_at.asc",
            doctor_id,
            day_range(date, date)?
        );
        self.supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)
    }

    async fn count_active_by_day(
        &self,
        doctor_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, usize>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?select=scheduled_at&doctor_id=eq.{}&status=neq.cancelled&{}",
            doctor_id,
            day_range(start, end)?
        );
        let rows: Vec<StartRow> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;

        let mut counts = BTreeMap::new();
        for row in rows {
            *counts.entry(row.scheduled_at.date()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn commit_booking(&self, booking: NewAppointment) -> Result<Appointment, AppointmentError> {
        let body = serde_json::to_value(&booking)
            .map_err(|e| AppointmentError::Storage(format!("Failed to encode booking: {}", e)))?;

        let created: Vec<Appointment> = self
            .supabase
            .write_returning(Method::POST, "/rest/v1/appointments", body)
            .await
            .map_err(write_error)?;

        created.into_iter().next().ok_or_else(|| {
            error!("Insert of appointment {} returned no row", booking.id);
            AppointmentError::Storage("Appointment insert returned no row".to_string())
        })
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        cancelled_at: NaiveDateTime,
        fee: f64,
    ) -> Result<bool, AppointmentError> {
        self.patch_scheduled(
            format!("id=eq.{}", id),
            json!({
                "status": AppointmentStatus::Cancelled,
                "cancelled_at": cancelled_at,
                "cancellation_fee": fee,
            }),
        )
        .await
    }

    async fn move_booking(
        &self,
        id: Uuid,
        from: NaiveDateTime,
        to: NaiveDateTime,
        notes: Option<String>,
    ) -> Result<bool, AppointmentError> {
        self.patch_scheduled(
            format!("id=eq.{}&scheduled_at=eq.{}", id, timestamp(from)),
            json!({
                "scheduled_at": to,
                "notes": notes,
            }),
        )
        .await
    }

    async fn mark_completed(&self, id: Uuid, notes: Option<String>) -> Result<bool, AppointmentError> {
        let mut body = json!({ "status": AppointmentStatus::Completed });
        if let Some(notes) = notes {
            body["notes"] = Value::String(notes);
        }
        self.patch_scheduled(format!("id=eq.{}", id), body).await
    }
}
