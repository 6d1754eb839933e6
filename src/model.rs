use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

// ── Working schedule ─────────────────────────────────────────────

/// Opening hours for a single weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub day_off: bool,
}

impl DayHours {
    pub fn working(open: NaiveTime, close: NaiveTime) -> Self {
        debug_assert!(open < close, "open must be before close");
        Self { open, close, day_off: false }
    }

    pub fn off() -> Self {
        Self {
            open: NaiveTime::MIN,
            close: NaiveTime::MIN,
            day_off: true,
        }
    }
}

/// Per-barber weekly schedule, indexed by weekday (Monday first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingSchedule {
    pub days: [DayHours; 7],
}

impl WorkingSchedule {
    /// Same hours every day except the listed days off.
    pub fn uniform(open: NaiveTime, close: NaiveTime, days_off: &[Weekday]) -> Self {
        let mut days = [DayHours::working(open, close); 7];
        for d in days_off {
            days[d.num_days_from_monday() as usize] = DayHours::off();
        }
        Self { days }
    }

    pub fn day(&self, weekday: Weekday) -> &DayHours {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    /// Open/close hours for a weekday, or None on a day off.
    pub fn hours_for(&self, weekday: Weekday) -> Option<(NaiveTime, NaiveTime)> {
        let d = self.day(weekday);
        if d.day_off { None } else { Some((d.open, d.close)) }
    }
}

// ── Booking rules ────────────────────────────────────────────────

/// Process-wide booking configuration (the shop's settings document).
///
/// `slot_duration_minutes` is assumed to divide evenly into each working-hour
/// span; a trailing partial slot is never offered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppointmentRules {
    pub min_advance_hours: u32,
    pub max_advance_days: u32,
    pub cancel_min_hours: u32,
    pub reschedule_min_hours: u32,
    pub max_appointments_per_day_per_client: u32,
    pub max_cancellations_per_month: u32,
    pub no_show_penalty_days: u32,
    pub slot_duration_minutes: u32,
}

impl Default for AppointmentRules {
    fn default() -> Self {
        Self {
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
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

/// Why an appointment ended up cancelled. Only `Client` cancellations count
/// against the monthly cancellation cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    Client,
    NoShow,
    Expired,
}

/// The single source of truth. Slots and client counters are derived views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub barber_id: Ulid,
    pub service_id: Ulid,
    pub client_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub price_cents: u32,
    pub used_plan_credit: bool,
    pub used_referral_credit: bool,
    /// 1..=5, settable once, only when completed.
    pub rating: Option<u8>,
    pub booked_at: NaiveDateTime,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancel_reason: Option<CancelReason>,
    /// Pending appointments only: when the unconfirmed request lapses.
    pub expires_at: Option<NaiveDateTime>,
}

impl Appointment {
    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    /// Holds its slot (pending and confirmed both reserve the calendar).
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        )
    }
}

/// A booking request before validation. Carries everything the transaction
/// manager needs to re-validate and commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingCandidate {
    pub barber_id: Ulid,
    pub service_id: Ulid,
    pub client_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub price_cents: u32,
    pub use_plan_credit: bool,
    pub use_referral_credit: bool,
}

impl BookingCandidate {
    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.barber_id, self.date, self.time)
    }
}

// ── Slots ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotAvailability {
    Free,
    Booked,
    Blocked,
}

/// Ephemeral candidate interval — derived on every query, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub barber_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub duration_minutes: u32,
    pub availability: SlotAvailability,
}

impl Slot {
    pub fn end(&self) -> NaiveTime {
        self.start + Duration::minutes(self.duration_minutes as i64)
    }
}

/// The mutual-exclusion key: one lock per (barber, date, start time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub barber_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(barber_id: Ulid, date: NaiveDate, time: NaiveTime) -> Self {
        Self { barber_id, date, time }
    }
}

// ── Derived client aggregates ────────────────────────────────────

/// Recomputed from appointment history on every rule evaluation — never
/// stored redundantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientCounters {
    /// Non-cancelled appointments on the date under evaluation.
    pub day_count: u32,
    /// Client-initiated cancellations in the current calendar month.
    pub cancellations_this_month: u32,
    pub last_no_show: Option<NaiveDate>,
}

/// Prepaid balances, granted by the surrounding app, debited at booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientCredits {
    pub plan: u32,
    pub referral: u32,
}

// ── Events ───────────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Booked {
        appointment: Appointment,
    },
    PendingConfirmed {
        id: Ulid,
        barber_id: Ulid,
    },
    Cancelled {
        id: Ulid,
        barber_id: Ulid,
        at: NaiveDateTime,
        reason: CancelReason,
    },
    Rescheduled {
        id: Ulid,
        barber_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    },
    Completed {
        id: Ulid,
        barber_id: Ulid,
    },
    Rated {
        id: Ulid,
        barber_id: Ulid,
        rating: u8,
    },
    PlanCreditsGranted {
        client_id: Ulid,
        count: u32,
    },
    ReferralCreditGranted {
        client_id: Ulid,
    },
}

impl Event {
    /// Barber whose calendar the event touches (None for credit grants).
    pub fn barber_id(&self) -> Option<Ulid> {
        match self {
            Event::Booked { appointment } => Some(appointment.barber_id),
            Event::PendingConfirmed { barber_id, .. }
            | Event::Cancelled { barber_id, .. }
            | Event::Rescheduled { barber_id, .. }
            | Event::Completed { barber_id, .. }
            | Event::Rated { barber_id, .. } => Some(*barber_id),
            Event::PlanCreditsGranted { .. } | Event::ReferralCreditGranted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn uniform_schedule_has_days_off() {
        let ws = WorkingSchedule::uniform(t(9, 0), t(18, 0), &[Weekday::Sun]);
        assert!(ws.day(Weekday::Sun).day_off);
        assert_eq!(ws.hours_for(Weekday::Mon), Some((t(9, 0), t(18, 0))));
        assert_eq!(ws.hours_for(Weekday::Sun), None);
    }

    #[test]
    fn slot_end_adds_duration() {
        let slot = Slot {
            barber_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            start: t(9, 0),
            duration_minutes: 30,
            availability: SlotAvailability::Free,
        };
        assert_eq!(slot.end(), t(9, 30));
    }

    #[test]
    fn slot_key_orders_by_barber_then_date_then_time() {
        let b = Ulid::new();
        let d1 = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 6, 11).unwrap();
        let k1 = SlotKey::new(b, d1, t(9, 0));
        let k2 = SlotKey::new(b, d1, t(9, 30));
        let k3 = SlotKey::new(b, d2, t(9, 0));
        assert!(k1 < k2);
        assert!(k2 < k3);
    }

    #[test]
    fn rules_deserialize_with_defaults() {
        let rules: AppointmentRules = serde_json::from_str(r#"{"min_advance_hours": 6}"#).unwrap();
        assert_eq!(rules.min_advance_hours, 6);
        assert_eq!(rules.slot_duration_minutes, 30);
        assert_eq!(rules.max_advance_days, 30);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::Cancelled {
            id: Ulid::new(),
            barber_id: Ulid::new(),
            at: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap().and_time(t(12, 0)),
            reason: CancelReason::Client,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
