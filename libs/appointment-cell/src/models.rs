// libs/appointment-cell/src/models.rs
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub pet_id: Uuid,
    pub doctor_id: Uuid,
    /// Clinic-local wall time, minute precision.
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancellation_fee: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn booked_interval(&self) -> BookedInterval {
        BookedInterval {
            scheduled_at: self.scheduled_at,
            duration_minutes: self.duration_minutes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An appointment joined with the display fields of its pet, client and doctor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub pet_name: String,
    pub pet_species: String,
    pub pet_breed: Option<String>,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub client_email: Option<String>,
    pub doctor_name: String,
    pub doctor_specialization: Option<String>,
}

/// Appointment details plus the time-window metadata the front desk needs.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedAppointment {
    #[serde(flatten)]
    pub details: AppointmentDetails,
    pub hours_until: f64,
    pub time_remaining: String,
    pub cancellation: CancellationDecision,
    pub reschedule: RescheduleDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelledAppointment {
    #[serde(flatten)]
    pub appointment: EnrichedAppointment,
    pub has_fee: bool,
    pub fee: f64,
}

// ==============================================================================
// POLICY DECISIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationType {
    Free,
    Warning,
    Paid,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationDecision {
    #[serde(rename = "type")]
    pub kind: CancellationType,
    pub allowed: bool,
    pub fee: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RescheduleDecision {
    pub allowed: bool,
    pub requires_approval: bool,
    pub message: String,
}

// ==============================================================================
// WORKING HOURS AND SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub fn from_date(date: NaiveDate) -> Self {
        use chrono::Datelike;
        Self::from(date.weekday())
    }

    /// Sunday = 0 .. Saturday = 6.
    pub fn index(&self) -> u32 {
        match self {
            DayOfWeek::Sunday => 0,
            DayOfWeek::Monday => 1,
            DayOfWeek::Tuesday => 2,
            DayOfWeek::Wednesday => 3,
            DayOfWeek::Thursday => 4,
            DayOfWeek::Friday => 5,
            DayOfWeek::Saturday => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Sunday => "sunday",
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sun => DayOfWeek::Sunday,
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A doctor's open/close interval for one weekday, clinic-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingInterval {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl WorkingInterval {
    pub fn contains(&self, time: NaiveTime) -> bool {
        time >= self.start_time && time < self.end_time
    }
}

/// The span a non-cancelled booking occupies on a doctor's day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedInterval {
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: i32,
}

impl BookedInterval {
    /// Saturates at the end of the calendar rather than overflowing.
    pub fn ends_at(&self) -> NaiveDateTime {
        self.scheduled_at
            .checked_add_signed(Duration::minutes(self.duration_minutes as i64))
            .unwrap_or(NaiveDateTime::MAX)
    }

    pub fn covers(&self, at: NaiveDateTime) -> bool {
        at >= self.scheduled_at && at < self.ends_at()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    /// "HH:MM"
    pub time: String,
    pub datetime: NaiveDateTime,
    pub available: bool,
    pub is_past: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableSlots {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    /// False when the doctor has no working hours on this weekday; an open
    /// but fully booked day keeps this true.
    pub works_this_day: bool,
    pub working_hours: Option<WorkingInterval>,
    pub slots: Vec<Slot>,
    pub message: Option<String>,
}

impl AvailableSlots {
    pub fn is_fully_booked(&self) -> bool {
        self.works_this_day && self.slots.iter().all(|slot| !slot.available)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotCheck {
    pub available: bool,
    pub reason: Option<String>,
}

// ==============================================================================
// RECORD STORE MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Client {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub specialization: Option<String>,
    pub is_active: bool,
}

impl Doctor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

// ==============================================================================
// LEDGER MODELS
// ==============================================================================

/// Row handed to the ledger's authoritative insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAppointment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub pet_id: Uuid,
    pub doctor_id: Uuid,
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentFilter {
    pub doctor_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AppointmentFilter {
    fn default() -> Self {
        Self {
            doctor_id: None,
            client_id: None,
            status: None,
            date: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentPage {
    pub data: Vec<EnrichedAppointment>,
    pub limit: i64,
    pub offset: i64,
}

/// Appointments grouped by clinic-local date, dates ascending.
pub type CalendarView = BTreeMap<NaiveDate, Vec<EnrichedAppointment>>;

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleDay {
    pub date: NaiveDate,
    pub day_of_week: DayOfWeek,
    pub is_working: bool,
    pub working_hours: Option<WorkingInterval>,
    pub appointment_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklySchedule {
    pub doctor: Doctor,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub schedule: Vec<ScheduleDay>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    pub client_id: Uuid,
    pub pet_id: Uuid,
    pub doctor_id: Uuid,
    #[serde(deserialize_with = "clinic_datetime::deserialize")]
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: Option<i32>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleAppointmentRequest {
    #[serde(deserialize_with = "clinic_datetime::deserialize")]
    pub scheduled_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteAppointmentRequest {
    pub notes: Option<String>,
}

/// Clinic-local timestamps as the UI sends them: `YYYY-MM-DDTHH:MM[:SS]` or
/// with a space separator.
pub mod clinic_datetime {
    use super::*;

    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid date-time '{}', expected YYYY-MM-DDTHH:MM",
                raw
            ))
        })
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidReference(String),

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Appointment is already cancelled")]
    AlreadyCancelled,

    #[error("{0}")]
    PolicyBlocked(String),

    #[error("{0}")]
    SlotConflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound(msg) => AppError::NotFound(msg),
            AppointmentError::SlotConflict(msg) => AppError::Conflict(msg),
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::Storage(msg) => AppError::Database(msg),
            other @ (AppointmentError::InvalidReference(_)
            | AppointmentError::InvalidTransition(_)
            | AppointmentError::AlreadyCancelled
            | AppointmentError::PolicyBlocked(_)) => AppError::BadRequest(other.to_string()),
        }
    }
}

// ==============================================================================
// SCHEDULING RULES
// ==============================================================================

/// Slots never step further than one day.
pub const MAX_SLOT_INTERVAL_MINUTES: i64 = 24 * 60;

/// Per-clinic booking rules handed to the policies and slot generator.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingRules {
    pub slot_interval_minutes: i64,
    pub default_duration_minutes: i32,
    pub min_duration_minutes: i32,
    pub max_duration_minutes: i32,
    pub cancellation_fee: f64,
    /// Below this many hours a cancellation is refused.
    pub cancellation_blocked_hours: f64,
    /// Below this many hours a cancellation costs `cancellation_fee`.
    pub cancellation_paid_hours: f64,
    /// Below this many hours a free cancellation carries a warning.
    pub cancellation_warning_hours: f64,
    pub reschedule_min_notice_hours: f64,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self {
            slot_interval_minutes: 30,
            default_duration_minutes: 30,
            min_duration_minutes: 15,
            max_duration_minutes: 120,
            cancellation_fee: 50.0,
            cancellation_blocked_hours: 24.0,
            cancellation_paid_hours: 48.0,
            cancellation_warning_hours: 72.0,
            reschedule_min_notice_hours: 0.0,
        }
    }
}

impl SchedulingRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            slot_interval_minutes: config.slot_interval_minutes,
            cancellation_fee: config.cancellation_fee,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), AppointmentError> {
        if !(1..=MAX_SLOT_INTERVAL_MINUTES).contains(&self.slot_interval_minutes) {
            return Err(AppointmentError::Validation(format!(
                "Slot interval must be between 1 and {} minutes",
                MAX_SLOT_INTERVAL_MINUTES
            )));
        }
        if self.min_duration_minutes <= 0 || self.min_duration_minutes > self.max_duration_minutes {
            return Err(AppointmentError::Validation(
                "Minimum duration must be positive and not exceed the maximum".to_string(),
            ));
        }
        if !(self.min_duration_minutes..=self.max_duration_minutes)
            .contains(&self.default_duration_minutes)
        {
            return Err(AppointmentError::Validation(
                "Default duration must lie within the allowed range".to_string(),
            ));
        }
        if self.cancellation_fee < 0.0 {
            return Err(AppointmentError::Validation(
                "Cancellation fee cannot be negative".to_string(),
            ));
        }
        if !(self.cancellation_blocked_hours <= self.cancellation_paid_hours
            && self.cancellation_paid_hours <= self.cancellation_warning_hours)
        {
            return Err(AppointmentError::Validation(
                "Cancellation thresholds must be ordered blocked <= paid <= warning".to_string(),
            ));
        }
        if self.reschedule_min_notice_hours < 0.0 {
            return Err(AppointmentError::Validation(
                "Reschedule notice cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the requested duration, falling back to the default.
    pub fn resolve_duration(&self, requested: Option<i32>) -> Result<i32, AppointmentError> {
        let duration = requested.unwrap_or(self.default_duration_minutes);
        if duration < self.min_duration_minutes || duration > self.max_duration_minutes {
            return Err(AppointmentError::Validation(format!(
                "Duration must be between {} and {} minutes",
                self.min_duration_minutes, self.max_duration_minutes
            )));
        }
        Ok(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn default_rules_are_valid() {
        assert_eq!(SchedulingRules::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_non_positive_slot_interval() {
        let rules = SchedulingRules {
            slot_interval_minutes: 0,
            ..SchedulingRules::default()
        };
        assert_matches!(rules.validate(), Err(AppointmentError::Validation(_)));
    }

    #[test]
    fn rejects_slot_interval_longer_than_a_day() {
        let day = SchedulingRules {
            slot_interval_minutes: MAX_SLOT_INTERVAL_MINUTES,
            ..SchedulingRules::default()
        };
        assert_eq!(day.validate(), Ok(()));

        let huge = SchedulingRules {
            slot_interval_minutes: 200_000_000_000,
            ..SchedulingRules::default()
        };
        assert_matches!(huge.validate(), Err(AppointmentError::Validation(_)));
    }

    #[test]
    fn booking_end_saturates_at_the_last_representable_minute() {
        let booking = BookedInterval {
            scheduled_at: NaiveDate::MAX.and_hms_opt(23, 59, 0).unwrap(),
            duration_minutes: 30,
        };
        assert_eq!(booking.ends_at(), NaiveDateTime::MAX);
        assert!(booking.covers(booking.scheduled_at));
    }

    #[test]
    fn rejects_unordered_cancellation_thresholds() {
        let rules = SchedulingRules {
            cancellation_paid_hours: 80.0,
            ..SchedulingRules::default()
        };
        assert_matches!(rules.validate(), Err(AppointmentError::Validation(_)));
    }

    #[test]
    fn resolves_duration_within_bounds() {
        let rules = SchedulingRules::default();
        assert_eq!(rules.resolve_duration(None), Ok(30));
        assert_eq!(rules.resolve_duration(Some(15)), Ok(15));
        assert_eq!(rules.resolve_duration(Some(120)), Ok(120));
        assert_matches!(rules.resolve_duration(Some(10)), Err(AppointmentError::Validation(_)));
        assert_matches!(rules.resolve_duration(Some(121)), Err(AppointmentError::Validation(_)));
    }

    #[test]
    fn weekday_index_starts_on_sunday() {
        let sunday = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert_eq!(DayOfWeek::from_date(sunday), DayOfWeek::Sunday);
        assert_eq!(DayOfWeek::from_date(sunday).index(), 0);
        assert_eq!(DayOfWeek::from_date(monday).index(), 1);
    }

    #[test]
    fn booked_interval_is_half_open() {
        let start = NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let booking = BookedInterval {
            scheduled_at: start,
            duration_minutes: 90,
        };
        assert!(booking.covers(start));
        assert!(booking.covers(start + Duration::minutes(89)));
        assert!(!booking.covers(start + Duration::minutes(90)));
        assert!(!booking.covers(start - Duration::minutes(1)));
    }

    #[test]
    fn parses_ui_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(clinic_datetime::parse("2024-06-03T09:30"), Some(expected));
        assert_eq!(clinic_datetime::parse("2024-06-03T09:30:00"), Some(expected));
        assert_eq!(clinic_datetime::parse("2024-06-03 09:30"), Some(expected));
        assert_eq!(clinic_datetime::parse("03.06.2024 09:30"), None);
    }

    #[test]
    fn maps_errors_onto_app_errors() {
        assert_matches!(
            AppError::from(AppointmentError::SlotConflict("taken".into())),
            AppError::Conflict(msg) if msg == "taken"
        );
        assert_matches!(
            AppError::from(AppointmentError::AlreadyCancelled),
            AppError::BadRequest(msg) if msg == "Appointment is already cancelled"
        );
        assert_matches!(
            AppError::from(AppointmentError::Storage("timeout".into())),
            AppError::Database(_)
        );
        assert_matches!(
            AppError::from(AppointmentError::PolicyBlocked("too late".into())),
            AppError::BadRequest(msg) if msg == "too late"
        );
        assert_matches!(
            AppError::from(AppointmentError::NotFound("gone".into())),
            AppError::NotFound(_)
        );
    }
}
