use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveDateTime, Timelike};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    AppointmentDetails, AppointmentError, AppointmentFilter, AppointmentPage, AppointmentStatus,
    AvailableSlots, CalendarView, CancelledAppointment, CreateAppointmentRequest, DayOfWeek, Doctor,
    EnrichedAppointment, NewAppointment, ScheduleDay, SchedulingRules, SlotCheck, WeeklySchedule,
    MAX_PAGE_LIMIT,
};
use crate::services::clock::ClinicClock;
use crate::services::ledger::BookingLedger;
use crate::services::policy::{format_time_remaining, CancellationPolicy, ReschedulePolicy};
use crate::services::records::RecordStore;
use crate::services::slots::{self, SlotGenerator};
use crate::services::working_hours::WorkingHoursProvider;

/// Orchestrates booking, slot lookup and the appointment state machine.
/// Holds no scheduling state of its own; every decision re-reads the store.
pub struct AppointmentScheduler {
    ledger: Arc<dyn BookingLedger>,
    records: Arc<dyn RecordStore>,
    working_hours: Arc<dyn WorkingHoursProvider>,
    clock: ClinicClock,
    rules: SchedulingRules,
    slot_generator: SlotGenerator,
    cancellation: CancellationPolicy,
    reschedule: ReschedulePolicy,
}

impl AppointmentScheduler {
    pub fn new(
        ledger: Arc<dyn BookingLedger>,
        records: Arc<dyn RecordStore>,
        working_hours: Arc<dyn WorkingHoursProvider>,
        clock: ClinicClock,
        rules: SchedulingRules,
    ) -> Result<Self, AppointmentError> {
        rules.validate()?;

        Ok(Self {
            slot_generator: SlotGenerator::new(&rules),
            cancellation: CancellationPolicy::new(&rules),
            reschedule: ReschedulePolicy::new(&rules),
            ledger,
            records,
            working_hours,
            clock,
            rules,
        })
    }

    /// Wires one store that plays all three collaborator roles.
    pub fn with_store<S>(
        store: Arc<S>,
        clock: ClinicClock,
        rules: SchedulingRules,
    ) -> Result<Self, AppointmentError>
    where
        S: BookingLedger + RecordStore + WorkingHoursProvider + 'static,
    {
        Self::new(store.clone(), store.clone(), store, clock, rules)
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub fn enrich(&self, details: AppointmentDetails) -> EnrichedAppointment {
        let hours_until = self.clock.hours_until(details.appointment.scheduled_at);

        EnrichedAppointment {
            time_remaining: format_time_remaining(hours_until),
            cancellation: self.cancellation.decide(hours_until),
            reschedule: self.reschedule.decide(hours_until),
            hours_until,
            details,
        }
    }

    pub async fn get_appointment(&self, id: Uuid) -> Result<EnrichedAppointment, AppointmentError> {
        debug!("Fetching appointment {}", id);
        let details = self.load(id).await?;
        Ok(self.enrich(details))
    }

    pub async fn list(&self, filter: AppointmentFilter) -> Result<AppointmentPage, AppointmentError> {
        let filter = AppointmentFilter {
            limit: filter.limit.clamp(1, MAX_PAGE_LIMIT),
            offset: filter.offset.max(0),
            ..filter
        };
        debug!("Listing appointments with {:?}", filter);

        let rows = self.ledger.list(&filter).await?;
        Ok(AppointmentPage {
            data: rows.into_iter().map(|row| self.enrich(row)).collect(),
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    /// Advisory slot list for one doctor and day.
    pub async fn suggest_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<AvailableSlots, AppointmentError> {
        debug!("Suggesting slots for doctor {} on {}", doctor_id, date);
        self.require_doctor(doctor_id).await?;

        let interval = self.working_hours.get(doctor_id, date).await?;
        let booked = match interval {
            Some(_) => self.ledger.booked_intervals(doctor_id, date).await?,
            None => Vec::new(),
        };

        Ok(self.slot_generator.available_slots(
            doctor_id,
            date,
            interval,
            &booked,
            self.clock.now_local(),
        ))
    }

    /// Advisory check of a single start time. Never used to admit a booking.
    pub async fn check_slot(
        &self,
        doctor_id: Uuid,
        scheduled_at: NaiveDateTime,
    ) -> Result<SlotCheck, AppointmentError> {
        self.require_doctor(doctor_id).await?;

        let scheduled_at = truncate_to_minute(scheduled_at);
        let date = scheduled_at.date();
        let interval = self.working_hours.get(doctor_id, date).await?;
        let booked = self.ledger.booked_intervals(doctor_id, date).await?;

        Ok(slots::check_slot(interval, &booked, scheduled_at))
    }

    pub async fn calendar_view(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        doctor_id: Option<Uuid>,
    ) -> Result<CalendarView, AppointmentError> {
        if start > end {
            return Err(AppointmentError::Validation(
                "start_date must not be after end_date".to_string(),
            ));
        }

        let rows = self.ledger.in_range(start, end, doctor_id).await?;
        let mut calendar = CalendarView::new();
        for row in rows {
            let date = row.appointment.scheduled_at.date();
            calendar.entry(date).or_default().push(self.enrich(row));
        }
        Ok(calendar)
    }

    pub async fn weekly_schedule(
        &self,
        doctor_id: Uuid,
        start_date: NaiveDate,
    ) -> Result<WeeklySchedule, AppointmentError> {
        let doctor = self.require_doctor(doctor_id).await?;
        let end_date = start_date.checked_add_days(Days::new(6)).ok_or_else(|| {
            AppointmentError::Validation(format!("start_date {} is out of range", start_date))
        })?;

        let week = self.working_hours.weekly(doctor_id).await?;
        let counts = self
            .ledger
            .count_active_by_day(doctor_id, start_date, end_date)
            .await?;

        let schedule = start_date
            .iter_days()
            .take(7)
            .map(|date| {
                let day_of_week = DayOfWeek::from_date(date);
                let working_hours = week
                    .iter()
                    .find(|(day, _)| *day == day_of_week)
                    .map(|(_, interval)| *interval);

                ScheduleDay {
                    date,
                    day_of_week,
                    is_working: working_hours.is_some(),
                    working_hours,
                    appointment_count: counts.get(&date).copied().unwrap_or(0),
                }
            })
            .collect();

        Ok(WeeklySchedule {
            doctor,
            start_date,
            end_date,
            schedule,
        })
    }

    // ==========================================================================
    // STATE TRANSITIONS
    // ==========================================================================

    pub async fn create(
        &self,
        request: CreateAppointmentRequest,
    ) -> Result<EnrichedAppointment, AppointmentError> {
        let duration_minutes = self.rules.resolve_duration(request.duration_minutes)?;
        let scheduled_at = truncate_to_minute(request.scheduled_at);
        debug!(
            "Booking pet {} with doctor {} at {}",
            request.pet_id, request.doctor_id, scheduled_at
        );

        if self
            .records
            .find_pet_owned_by_client(request.pet_id, request.client_id)
            .await?
            .is_none()
        {
            return Err(AppointmentError::InvalidReference(
                "Pet does not belong to this client".to_string(),
            ));
        }

        if self
            .records
            .find_active_doctor(request.doctor_id)
            .await?
            .is_none()
        {
            return Err(AppointmentError::InvalidReference(
                "Doctor not found or inactive".to_string(),
            ));
        }

        let booking = NewAppointment {
            id: Uuid::new_v4(),
            client_id: request.client_id,
            pet_id: request.pet_id,
            doctor_id: request.doctor_id,
            scheduled_at,
            duration_minutes,
            status: AppointmentStatus::Scheduled,
            reason: non_empty(request.reason),
            notes: non_empty(request.notes),
            created_at: self.clock.now_utc(),
        };

        let appointment = self.ledger.commit_booking(booking).await?;
        info!(
            "Appointment {} booked for doctor {} at {}",
            appointment.id, appointment.doctor_id, appointment.scheduled_at
        );

        self.get_appointment(appointment.id).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<CancelledAppointment, AppointmentError> {
        let current = self.load(id).await?;
        ensure_scheduled(&current, Operation::Cancel)?;

        let hours_until = self.clock.hours_until(current.appointment.scheduled_at);
        let decision = self.cancellation.decide(hours_until);
        if !decision.allowed {
            warn!("Cancellation of {} blocked: {}", id, decision.message);
            return Err(AppointmentError::PolicyBlocked(decision.message));
        }

        let cancelled = self
            .ledger
            .mark_cancelled(id, self.clock.now_local(), decision.fee)
            .await?;
        if !cancelled {
            return Err(self.stale(id, Operation::Cancel).await);
        }
        info!("Appointment {} cancelled (fee {:.2})", id, decision.fee);

        Ok(CancelledAppointment {
            appointment: self.get_appointment(id).await?,
            has_fee: decision.fee > 0.0,
            fee: decision.fee,
        })
    }

    pub async fn reschedule(
        &self,
        id: Uuid,
        new_scheduled_at: NaiveDateTime,
    ) -> Result<EnrichedAppointment, AppointmentError> {
        let current = self.load(id).await?;
        ensure_scheduled(&current, Operation::Reschedule)?;

        let previous = current.appointment.scheduled_at;
        let decision = self.reschedule.decide(self.clock.hours_until(previous));
        if !decision.allowed {
            warn!("Reschedule of {} blocked: {}", id, decision.message);
            return Err(AppointmentError::PolicyBlocked(decision.message));
        }

        let target = truncate_to_minute(new_scheduled_at);
        let notes = append_reschedule_note(current.appointment.notes, previous);

        let moved = self.ledger.move_booking(id, previous, target, Some(notes)).await?;
        if !moved {
            return Err(self.stale(id, Operation::Reschedule).await);
        }
        info!("Appointment {} moved from {} to {}", id, previous, target);

        self.get_appointment(id).await
    }

    pub async fn complete(
        &self,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<EnrichedAppointment, AppointmentError> {
        let current = self.load(id).await?;
        ensure_scheduled(&current, Operation::Complete)?;

        let completed = self.ledger.mark_completed(id, non_empty(notes)).await?;
        if !completed {
            return Err(self.stale(id, Operation::Complete).await);
        }
        info!("Appointment {} completed", id);

        self.get_appointment(id).await
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn load(&self, id: Uuid) -> Result<AppointmentDetails, AppointmentError> {
        self.ledger
            .find(id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Appointment not found".to_string()))
    }

    async fn require_doctor(&self, doctor_id: Uuid) -> Result<Doctor, AppointmentError> {
        self.records
            .find_doctor(doctor_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Doctor not found".to_string()))
    }

    /// A conditional write matched nothing: the row changed after it was
    /// read. Re-read it and report what the caller would now see.
    async fn stale(&self, id: Uuid, operation: Operation) -> AppointmentError {
        warn!("Appointment {} changed during {:?}", id, operation);
        match self.load(id).await {
            Err(err) => err,
            Ok(current) => match ensure_scheduled(&current, operation) {
                Err(err) => err,
                Ok(()) => AppointmentError::InvalidTransition(
                    "Appointment was modified by another request, reload and retry".to_string(),
                ),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Cancel,
    Reschedule,
    Complete,
}

fn ensure_scheduled(current: &AppointmentDetails, operation: Operation) -> Result<(), AppointmentError> {
    let status = current.appointment.status;
    match (status, operation) {
        (AppointmentStatus::Scheduled, _) => Ok(()),
        (AppointmentStatus::Cancelled, Operation::Cancel) => Err(AppointmentError::AlreadyCancelled),
        (_, Operation::Cancel) => Err(AppointmentError::InvalidTransition(format!(
            "Cannot cancel an appointment with status '{}'",
            status
        ))),
        (_, Operation::Reschedule) => Err(AppointmentError::InvalidTransition(format!(
            "Cannot reschedule an appointment with status '{}'",
            status
        ))),
        (_, Operation::Complete) => Err(AppointmentError::InvalidTransition(format!(
            "Cannot complete an appointment with status '{}'",
            status
        ))),
    }
}

fn truncate_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn append_reschedule_note(notes: Option<String>, previous: NaiveDateTime) -> String {
    let entry = format!("[Rescheduled from: {}]", previous.format("%Y-%m-%d %H:%M"));
    match notes.filter(|n| !n.is_empty()) {
        Some(existing) => format!("{} {}", existing, entry),
        None => entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn truncates_seconds() {
        assert_eq!(truncate_to_minute(at(9, 30, 45)), at(9, 30, 0));
    }

    #[test]
    fn appends_reschedule_audit_note() {
        assert_eq!(
            append_reschedule_note(Some("Limping".into()), at(9, 0, 0)),
            "Limping [Rescheduled from: 2024-06-03 09:00]"
        );
        assert_eq!(
            append_reschedule_note(None, at(14, 30, 0)),
            "[Rescheduled from: 2024-06-03 14:30]"
        );
    }

    #[test]
    fn blank_text_is_dropped() {
        assert_eq!(non_empty(Some("   ".into())), None);
        assert_eq!(non_empty(Some(" x ".into())), Some("x".into()));
    }
}
