use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::models::AppointmentError;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a settable instant. Shared between a test and the
/// scheduler it drives.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Wall clock bound to the clinic's time zone. Appointment times are stored
/// as clinic-local wall time; every time-window rule goes through here.
#[derive(Clone)]
pub struct ClinicClock {
    clock: Arc<dyn Clock>,
    timezone: Tz,
}

impl ClinicClock {
    pub fn new(clock: Arc<dyn Clock>, timezone: Tz) -> Self {
        Self { clock, timezone }
    }

    pub fn with_timezone_name(clock: Arc<dyn Clock>, name: &str) -> Result<Self, AppointmentError> {
        let timezone = name.trim().parse::<Tz>().map_err(|e| {
            AppointmentError::Validation(format!("Unknown clinic time zone '{}': {}", name, e))
        })?;
        Ok(Self::new(clock, timezone))
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    /// Current clinic-local wall time.
    pub fn now_local(&self) -> NaiveDateTime {
        self.now_utc().with_timezone(&self.timezone).naive_local()
    }

    /// Maps clinic-local wall time to an instant. Ambiguous times (clocks
    /// going back) resolve to the earlier instant; times inside a gap
    /// (clocks going forward) are pushed forward by an hour.
    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match self.timezone.from_local_datetime(&local) {
            LocalResult::Single(at) => at.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => match self
                .timezone
                .from_local_datetime(&(local + Duration::hours(1)))
            {
                LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => at.with_timezone(&Utc),
                LocalResult::None => Utc.from_utc_datetime(&local),
            },
        }
    }

    /// Signed hours from now until `local`; negative once it has passed.
    pub fn hours_until(&self, local: NaiveDateTime) -> f64 {
        let delta = self.to_utc(local) - self.now_utc();
        delta.num_milliseconds() as f64 / 3_600_000.0
    }
}
