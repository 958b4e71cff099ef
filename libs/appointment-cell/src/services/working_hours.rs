use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{AppointmentError, DayOfWeek, WorkingInterval};

/// Recurring weekly availability of a doctor. At most one interval per
/// weekday; no holiday overrides.
#[async_trait]
pub trait WorkingHoursProvider: Send + Sync {
    /// The interval for `date`'s weekday, or `None` when the doctor is off.
    async fn get(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<WorkingInterval>, AppointmentError>;

    /// Every configured weekday, Sunday first.
    async fn weekly(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<(DayOfWeek, WorkingInterval)>, AppointmentError>;
}
