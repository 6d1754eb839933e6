use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::MAX_QUERY_RANGE_DAYS;
use crate::model::*;
use crate::observability;

use super::rules::evaluate_booking;
use super::slots::generate_slots;
use super::{now, Engine, EngineError};

impl Engine {
    /// Free slots for one barber over an inclusive date range: the generated
    /// grid, minus booked slots, minus slots the rules reject. When
    /// `client_id` is given, that client's daily limit and penalty window
    /// filter the result too.
    pub async fn find_available_slots(
        &self,
        barber_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        client_id: Option<Ulid>,
    ) -> Result<Vec<Slot>, EngineError> {
        if to < from {
            return Ok(Vec::new());
        }
        if (to - from).num_days() > MAX_QUERY_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("date range too wide"));
        }
        metrics::counter!(observability::SLOT_QUERIES_TOTAL).increment(1);

        let schedule = self.schedule_for(barber_id).await?;
        let rules = self.directory.rules().await;
        let now = now();

        let mut free = Vec::new();
        let mut date = from;
        while date <= to {
            let counters = match client_id {
                Some(c) => self.counters_for(c, date, now, None),
                None => ClientCounters::default(),
            };
            for slot in generate_slots(barber_id, date, &schedule, rules.slot_duration_minutes) {
                if self.calendar.is_booked(barber_id, date, slot.start) {
                    continue;
                }
                if evaluate_booking(date.and_time(slot.start), &rules, now, &counters).is_ok() {
                    free.push(slot);
                }
            }
            date += Duration::days(1);
        }
        Ok(free)
    }

    /// The full slot grid for one barber/day, each slot tagged free, booked,
    /// or blocked (bookable hours that the advance rules currently exclude).
    pub async fn day_grid(
        &self,
        barber_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, EngineError> {
        let schedule = self.schedule_for(barber_id).await?;
        let rules = self.directory.rules().await;
        let now = now();

        let mut grid = generate_slots(barber_id, date, &schedule, rules.slot_duration_minutes);
        for slot in &mut grid {
            if self.calendar.is_booked(barber_id, date, slot.start) {
                slot.availability = SlotAvailability::Booked;
            } else if evaluate_booking(
                date.and_time(slot.start),
                &rules,
                now,
                &ClientCounters::default(),
            )
            .is_err()
            {
                slot.availability = SlotAvailability::Blocked;
            }
        }
        Ok(grid)
    }

    /// Appointments for one barber within an inclusive date range, ascending
    /// by start.
    pub fn appointments_for(
        &self,
        barber_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Vec<Appointment> {
        let mut out: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|a| a.barber_id == barber_id && a.date >= from && a.date <= to)
            .map(|a| a.value().clone())
            .collect();
        out.sort_by_key(|a| (a.date, a.time));
        out
    }

    /// All of a client's appointments, ascending by start.
    pub fn client_appointments(&self, client_id: Ulid) -> Vec<Appointment> {
        let mut out: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|a| a.client_id == client_id)
            .map(|a| a.value().clone())
            .collect();
        out.sort_by_key(|a| (a.date, a.time));
        out
    }

    /// Derived booking counters for a client, as used by the rule evaluator.
    pub fn client_counters(&self, client_id: Ulid, date: NaiveDate) -> ClientCounters {
        self.counters_for(client_id, date, now(), None)
    }

    pub fn credit_balance(&self, client_id: Ulid) -> ClientCredits {
        self.credits
            .get(&client_id)
            .map(|c| *c.value())
            .unwrap_or_default()
    }

    /// Recompute counters from appointment history. `exclude` drops one
    /// appointment from the day count (a reschedule must not count itself).
    pub(super) fn counters_for(
        &self,
        client_id: Ulid,
        date: NaiveDate,
        now: NaiveDateTime,
        exclude: Option<Ulid>,
    ) -> ClientCounters {
        let mut counters = ClientCounters::default();
        for a in self.appointments.iter() {
            if a.client_id != client_id || Some(a.id) == exclude {
                continue;
            }
            if a.date == date && a.status != AppointmentStatus::Cancelled {
                counters.day_count += 1;
            }
            if a.cancel_reason == Some(CancelReason::Client)
                && let Some(at) = a.cancelled_at
                && at.year() == now.year()
                && at.month() == now.month()
            {
                counters.cancellations_this_month += 1;
            }
            if a.cancel_reason == Some(CancelReason::NoShow)
                && counters.last_no_show.is_none_or(|d| d < a.date)
            {
                counters.last_no_show = Some(a.date);
            }
        }
        counters
    }
}
