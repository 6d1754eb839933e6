use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::model::{AppointmentRules, ClientCounters};

use super::EngineError;

/// Outcome of the pure rule checks. Converted into `EngineError` at the
/// transaction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleViolation {
    AdvanceTooSoon,
    AdvanceTooFar,
    DailyLimitExceeded,
    ClientBlocked { until: NaiveDate },
    CancelTooLate,
    CancellationLimitExceeded,
    RescheduleTooLate,
}

impl From<RuleViolation> for EngineError {
    fn from(v: RuleViolation) -> Self {
        match v {
            RuleViolation::AdvanceTooSoon => EngineError::AdvanceTooSoon,
            RuleViolation::AdvanceTooFar => EngineError::AdvanceTooFar,
            RuleViolation::DailyLimitExceeded => EngineError::DailyLimitExceeded,
            RuleViolation::ClientBlocked { until } => EngineError::ClientBlocked { until },
            RuleViolation::CancelTooLate => EngineError::CancelTooLate,
            RuleViolation::CancellationLimitExceeded => EngineError::CancellationLimitExceeded,
            RuleViolation::RescheduleTooLate => EngineError::RescheduleTooLate,
        }
    }
}

/// Validate a candidate booking start against the shop rules.
///
/// Checks run in a fixed order and short-circuit on the first failure.
/// Threshold comparisons are inclusive at the boundary in the rejecting
/// direction: exactly `min_advance_hours` ahead is accepted, one second less
/// is not.
pub fn evaluate_booking(
    start: NaiveDateTime,
    rules: &AppointmentRules,
    now: NaiveDateTime,
    counters: &ClientCounters,
) -> Result<(), RuleViolation> {
    if start - now < Duration::hours(rules.min_advance_hours as i64) {
        return Err(RuleViolation::AdvanceTooSoon);
    }
    if (start.date() - now.date()).num_days() > rules.max_advance_days as i64 {
        return Err(RuleViolation::AdvanceTooFar);
    }
    if counters.day_count >= rules.max_appointments_per_day_per_client {
        return Err(RuleViolation::DailyLimitExceeded);
    }
    if let Some(no_show) = counters.last_no_show {
        let until = no_show + Duration::days(rules.no_show_penalty_days as i64);
        if now.date() < until {
            return Err(RuleViolation::ClientBlocked { until });
        }
    }
    Ok(())
}

/// Validate a cancellation request against the existing appointment's start.
pub fn evaluate_cancel(
    existing_start: NaiveDateTime,
    rules: &AppointmentRules,
    now: NaiveDateTime,
    counters: &ClientCounters,
) -> Result<(), RuleViolation> {
    if existing_start - now < Duration::hours(rules.cancel_min_hours as i64) {
        return Err(RuleViolation::CancelTooLate);
    }
    if counters.cancellations_this_month >= rules.max_cancellations_per_month {
        return Err(RuleViolation::CancellationLimitExceeded);
    }
    Ok(())
}

/// Validate the cutoff for moving an appointment, against its original start.
pub fn evaluate_reschedule(
    original_start: NaiveDateTime,
    rules: &AppointmentRules,
    now: NaiveDateTime,
) -> Result<(), RuleViolation> {
    if original_start - now < Duration::hours(rules.reschedule_min_hours as i64) {
        return Err(RuleViolation::RescheduleTooLate);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(h, mi, s).unwrap())
    }

    fn rules() -> AppointmentRules {
        AppointmentRules {
            min_advance_hours: 2,
            max_advance_days: 30,
            cancel_min_hours: 4,
            reschedule_min_hours: 4,
            max_appointments_per_day_per_client: 2,
            max_cancellations_per_month: 3,
            no_show_penalty_days: 7,
            slot_duration_minutes: 30,
        }
    }

    // ── advance window boundaries ────────────────────────

    #[test]
    fn exactly_min_advance_is_accepted() {
        let now = dt(2024, 6, 10, 8, 0, 0);
        let start = dt(2024, 6, 10, 10, 0, 0); // exactly 2h ahead
        assert!(evaluate_booking(start, &rules(), now, &ClientCounters::default()).is_ok());
    }

    #[test]
    fn one_second_under_min_advance_is_rejected() {
        let now = dt(2024, 6, 10, 8, 0, 1);
        let start = dt(2024, 6, 10, 10, 0, 0); // 1h59m59s ahead
        assert_eq!(
            evaluate_booking(start, &rules(), now, &ClientCounters::default()),
            Err(RuleViolation::AdvanceTooSoon)
        );
    }

    #[test]
    fn past_start_is_advance_too_soon() {
        let now = dt(2024, 6, 10, 12, 0, 0);
        let start = dt(2024, 6, 10, 9, 0, 0);
        assert_eq!(
            evaluate_booking(start, &rules(), now, &ClientCounters::default()),
            Err(RuleViolation::AdvanceTooSoon)
        );
    }

    #[test]
    fn exactly_max_advance_days_is_accepted() {
        let now = dt(2024, 6, 1, 8, 0, 0);
        let start = dt(2024, 7, 1, 10, 0, 0); // 30 days ahead by calendar date
        assert!(evaluate_booking(start, &rules(), now, &ClientCounters::default()).is_ok());
    }

    #[test]
    fn beyond_max_advance_days_is_rejected() {
        let now = dt(2024, 6, 1, 8, 0, 0);
        let start = dt(2024, 7, 2, 10, 0, 0); // 31 days ahead
        assert_eq!(
            evaluate_booking(start, &rules(), now, &ClientCounters::default()),
            Err(RuleViolation::AdvanceTooFar)
        );
    }

    // ── counters ─────────────────────────────────────────

    #[test]
    fn daily_limit_rejects_at_cap() {
        let now = dt(2024, 6, 10, 8, 0, 0);
        let start = dt(2024, 6, 10, 14, 0, 0);
        let counters = ClientCounters { day_count: 2, ..Default::default() };
        assert_eq!(
            evaluate_booking(start, &rules(), now, &counters),
            Err(RuleViolation::DailyLimitExceeded)
        );
    }

    #[test]
    fn daily_limit_allows_under_cap() {
        let now = dt(2024, 6, 10, 8, 0, 0);
        let start = dt(2024, 6, 10, 14, 0, 0);
        let counters = ClientCounters { day_count: 1, ..Default::default() };
        assert!(evaluate_booking(start, &rules(), now, &counters).is_ok());
    }

    #[test]
    fn no_show_penalty_blocks_until_window_ends() {
        let no_show = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        let counters = ClientCounters { last_no_show: Some(no_show), ..Default::default() };
        let start = dt(2024, 6, 20, 10, 0, 0);

        // Day 6 of a 7-day penalty: still blocked
        let now = dt(2024, 6, 11, 8, 0, 0);
        assert_eq!(
            evaluate_booking(start, &rules(), now, &counters),
            Err(RuleViolation::ClientBlocked {
                until: NaiveDate::from_ymd_opt(2024, 6, 12).unwrap()
            })
        );

        // Exactly at penalty end: allowed again
        let now = dt(2024, 6, 12, 8, 0, 0);
        assert!(evaluate_booking(start, &rules(), now, &counters).is_ok());
    }

    #[test]
    fn checks_short_circuit_in_order() {
        // Both too soon AND at daily cap — the advance check wins.
        let now = dt(2024, 6, 10, 9, 30, 0);
        let start = dt(2024, 6, 10, 10, 0, 0);
        let counters = ClientCounters { day_count: 5, ..Default::default() };
        assert_eq!(
            evaluate_booking(start, &rules(), now, &counters),
            Err(RuleViolation::AdvanceTooSoon)
        );
    }

    // ── cancellation / reschedule cutoffs ────────────────

    #[test]
    fn cancel_cutoff_boundary() {
        let start = dt(2024, 6, 10, 14, 0, 0);
        let counters = ClientCounters::default();

        let now = dt(2024, 6, 10, 10, 0, 0); // exactly 4h before
        assert!(evaluate_cancel(start, &rules(), now, &counters).is_ok());

        let now = dt(2024, 6, 10, 10, 0, 1);
        assert_eq!(
            evaluate_cancel(start, &rules(), now, &counters),
            Err(RuleViolation::CancelTooLate)
        );
    }

    #[test]
    fn monthly_cancellation_cap() {
        let start = dt(2024, 6, 20, 14, 0, 0);
        let now = dt(2024, 6, 10, 10, 0, 0);
        let counters = ClientCounters { cancellations_this_month: 3, ..Default::default() };
        assert_eq!(
            evaluate_cancel(start, &rules(), now, &counters),
            Err(RuleViolation::CancellationLimitExceeded)
        );
    }

    #[test]
    fn reschedule_cutoff() {
        let start = dt(2024, 6, 10, 14, 0, 0);

        let now = dt(2024, 6, 10, 13, 0, 0); // 1h before, cutoff is 4h
        assert_eq!(
            evaluate_reschedule(start, &rules(), now),
            Err(RuleViolation::RescheduleTooLate)
        );

        let now = dt(2024, 6, 10, 10, 0, 0);
        assert!(evaluate_reschedule(start, &rules(), now).is_ok());
    }
}
