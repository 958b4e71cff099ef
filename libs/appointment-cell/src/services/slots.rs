use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    AvailableSlots, BookedInterval, SchedulingRules, Slot, SlotCheck, WorkingInterval,
    MAX_SLOT_INTERVAL_MINUTES,
};

pub const DOES_NOT_WORK_MESSAGE: &str = "Doctor does not work on this day";
pub const OUTSIDE_HOURS_MESSAGE: &str = "Outside working hours";
pub const SLOT_TAKEN_MESSAGE: &str = "This time slot is already taken";

/// Enumerates fixed-width start times across a working interval and flags
/// each against existing bookings and the current time. Advisory only: the
/// ledger's uniqueness guard decides admission.
#[derive(Debug, Clone)]
pub struct SlotGenerator {
    step: Duration,
}

impl SlotGenerator {
    pub fn new(rules: &SchedulingRules) -> Self {
        Self {
            step: Duration::minutes(
                rules
                    .slot_interval_minutes
                    .clamp(1, MAX_SLOT_INTERVAL_MINUTES),
            ),
        }
    }

    /// Candidate starts run from `interval.start_time` while strictly before
    /// `interval.end_time`. The last slot may overhang the end.
    pub fn generate(
        &self,
        date: NaiveDate,
        interval: &WorkingInterval,
        booked: &[BookedInterval],
        now: NaiveDateTime,
    ) -> Vec<Slot> {
        let end = date.and_time(interval.end_time);
        let mut cursor = date.and_time(interval.start_time);
        let mut slots = Vec::new();

        while cursor < end {
            let is_taken = booked.iter().any(|booking| booking.covers(cursor));
            let is_past = cursor < now;

            slots.push(Slot {
                time: cursor.format("%H:%M").to_string(),
                datetime: cursor,
                available: !is_taken && !is_past,
                is_past,
            });

            match cursor.checked_add_signed(self.step) {
                Some(next) => cursor = next,
                None => break,
            }
        }

        slots
    }

    /// Slots for one doctor and day. A day off is reported as such rather
    /// than as an empty, fully booked list.
    pub fn available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        interval: Option<WorkingInterval>,
        booked: &[BookedInterval],
        now: NaiveDateTime,
    ) -> AvailableSlots {
        let Some(interval) = interval else {
            debug!("Doctor {} has no working hours on {}", doctor_id, date);
            return AvailableSlots {
                doctor_id,
                date,
                works_this_day: false,
                working_hours: None,
                slots: Vec::new(),
                message: Some(DOES_NOT_WORK_MESSAGE.to_string()),
            };
        };

        let slots = self.generate(date, &interval, booked, now);
        debug!(
            "Generated {} slots for doctor {} on {} ({} booked intervals)",
            slots.len(),
            doctor_id,
            date,
            booked.len()
        );

        AvailableSlots {
            doctor_id,
            date,
            works_this_day: true,
            working_hours: Some(interval),
            slots,
            message: None,
        }
    }
}

/// Whether a single start time looks bookable.
pub fn check_slot(
    interval: Option<WorkingInterval>,
    booked: &[BookedInterval],
    at: NaiveDateTime,
) -> SlotCheck {
    let unavailable = |reason: &str| SlotCheck {
        available: false,
        reason: Some(reason.to_string()),
    };

    let Some(interval) = interval else {
        return unavailable(DOES_NOT_WORK_MESSAGE);
    };
    if !interval.contains(at.time()) {
        return unavailable(OUTSIDE_HOURS_MESSAGE);
    }
    if booked.iter().any(|booking| booking.covers(at)) {
        return unavailable(SLOT_TAKEN_MESSAGE);
    }

    SlotCheck {
        available: true,
        reason: None,
    }
}
