use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentDetails, AppointmentError, AppointmentFilter, BookedInterval,
    NewAppointment,
};

pub const SLOT_CONFLICT_MESSAGE: &str = "The doctor already has an appointment at this time";

/// Authoritative appointment store. Implementations guarantee that no two
/// non-cancelled appointments of one doctor share a start time; a write
/// that would break this fails with `SlotConflict`.
///
/// The `mark_*`/`move_booking` calls only touch a row that is still
/// `scheduled` (and, for a move, still at `from`). They return `false` when
/// nothing matched.
#[async_trait]
pub trait BookingLedger: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<AppointmentDetails>, AppointmentError>;

    /// Filtered page ordered by start time.
    async fn list(
        &self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError>;

    /// Appointments of any status whose date lies in `[start, end]`, ordered
    /// by start time.
    async fn in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        doctor_id: Option<Uuid>,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError>;

    /// Non-cancelled bookings of a doctor on one date.
    async fn booked_intervals(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<BookedInterval>, AppointmentError>;

    /// Non-cancelled appointment count per date in `[start, end]`. Dates
    /// without appointments may be absent.
    async fn count_active_by_day(
        &self,
        doctor_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, usize>, AppointmentError>;

    async fn commit_booking(&self, booking: NewAppointment) -> Result<Appointment, AppointmentError>;

    async fn mark_cancelled(
        &self,
        id: Uuid,
        cancelled_at: NaiveDateTime,
        fee: f64,
    ) -> Result<bool, AppointmentError>;

    async fn move_booking(
        &self,
        id: Uuid,
        from: NaiveDateTime,
        to: NaiveDateTime,
        notes: Option<String>,
    ) -> Result<bool, AppointmentError>;

    /// `notes` replaces the stored notes only when present.
    async fn mark_completed(&self, id: Uuid, notes: Option<String>) -> Result<bool, AppointmentError>;
}
