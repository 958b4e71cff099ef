use crate::models::{CancellationDecision, CancellationType, RescheduleDecision, SchedulingRules};

const ALREADY_TAKEN_PLACE: &str = "Appointment has already taken place";

/// Decides whether, and at what cost, an appointment may be cancelled given
/// the hours left until it starts. Bands are half-open on the upper bound.
#[derive(Debug, Clone)]
pub struct CancellationPolicy {
    blocked_below: f64,
    paid_below: f64,
    warning_below: f64,
    fee: f64,
}

impl CancellationPolicy {
    pub fn new(rules: &SchedulingRules) -> Self {
        Self {
            blocked_below: rules.cancellation_blocked_hours,
            paid_below: rules.cancellation_paid_hours,
            warning_below: rules.cancellation_warning_hours,
            fee: rules.cancellation_fee,
        }
    }

    pub fn decide(&self, hours_until: f64) -> CancellationDecision {
        if hours_until < self.blocked_below {
            return CancellationDecision {
                kind: CancellationType::Blocked,
                allowed: false,
                fee: 0.0,
                message: format!(
                    "Too late to cancel the appointment (less than {}h before)",
                    self.blocked_below
                ),
            };
        }

        if hours_until < self.paid_below {
            return CancellationDecision {
                kind: CancellationType::Paid,
                allowed: true,
                fee: self.fee,
                message: format!(
                    "Cancellation fee of {:.2} applies (less than {}h before)",
                    self.fee, self.paid_below
                ),
            };
        }

        if hours_until < self.warning_below {
            return CancellationDecision {
                kind: CancellationType::Warning,
                allowed: true,
                fee: 0.0,
                message: "Note: this is a last-minute cancellation".to_string(),
            };
        }

        CancellationDecision {
            kind: CancellationType::Free,
            allowed: true,
            fee: 0.0,
            message: "Free cancellation".to_string(),
        }
    }
}

/// Rescheduling is allowed until the appointment starts.
#[derive(Debug, Clone)]
pub struct ReschedulePolicy {
    min_notice_hours: f64,
}

impl ReschedulePolicy {
    pub fn new(rules: &SchedulingRules) -> Self {
        Self {
            min_notice_hours: rules.reschedule_min_notice_hours,
        }
    }

    pub fn decide(&self, hours_until: f64) -> RescheduleDecision {
        if hours_until < 0.0 {
            return RescheduleDecision {
                allowed: false,
                requires_approval: false,
                message: "Cannot reschedule an appointment that has already taken place".to_string(),
            };
        }

        if hours_until < self.min_notice_hours {
            return RescheduleDecision {
                allowed: false,
                requires_approval: false,
                message: format!(
                    "Rescheduling requires at least {}h notice",
                    self.min_notice_hours
                ),
            };
        }

        RescheduleDecision {
            allowed: true,
            requires_approval: false,
            message: "Rescheduling is possible".to_string(),
        }
    }
}

/// Human-readable time left, e.g. "1 day and 1 hour" or "2 hours and 30 minutes".
pub fn format_time_remaining(hours: f64) -> String {
    if hours < 0.0 {
        return ALREADY_TAKEN_PLACE.to_string();
    }
    if hours == 0.0 {
        return "0 minutes".to_string();
    }

    let days = (hours / 24.0).floor() as i64;
    let remaining_hours = (hours % 24.0).floor() as i64;
    let minutes = ((hours % 1.0) * 60.0).round() as i64;

    let parts: Vec<String> = [(days, "day"), (remaining_hours, "hour"), (minutes, "minute")]
        .into_iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| pluralize(value, unit))
        .collect();

    if parts.is_empty() {
        // Sub-half-minute remainders round away entirely.
        return "0 minutes".to_string();
    }
    parts.join(" and ")
}

fn pluralize(value: i64, unit: &str) -> String {
    if value == 1 {
        format!("{} {}", value, unit)
    } else {
        format!("{} {}s", value, unit)
    }
}
