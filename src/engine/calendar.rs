use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::WorkingSchedule;

use super::slots::slot_exists;

/// Per-barber, per-day index of booked slot start times. The single mutable
/// shared resource in the engine; all writes go through the transaction
/// manager, never through query paths.
pub struct CalendarIndex {
    booked: DashMap<(Ulid, NaiveDate), BTreeSet<NaiveTime>>,
}

impl Default for CalendarIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarIndex {
    pub fn new() -> Self {
        Self { booked: DashMap::new() }
    }

    pub fn mark_booked(&self, barber_id: Ulid, date: NaiveDate, time: NaiveTime) {
        self.booked.entry((barber_id, date)).or_default().insert(time);
    }

    /// Release a slot. No-op if it was not marked.
    pub fn clear(&self, barber_id: Ulid, date: NaiveDate, time: NaiveTime) {
        if let Some(mut entry) = self.booked.get_mut(&(barber_id, date)) {
            entry.remove(&time);
        }
    }

    pub fn is_booked(&self, barber_id: Ulid, date: NaiveDate, time: NaiveTime) -> bool {
        self.booked
            .get(&(barber_id, date))
            .is_some_and(|times| times.contains(&time))
    }

    /// A slot is free only when it lies on the working-hours grid AND is not
    /// booked. Closed hours are never free.
    pub fn is_free(
        &self,
        barber_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        schedule: &WorkingSchedule,
        slot_minutes: u32,
    ) -> bool {
        slot_exists(schedule, date, time, slot_minutes)
            && !self.is_booked(barber_id, date, time)
    }

    /// Booked start times for one barber/day, ascending.
    pub fn booked_on(&self, barber_id: Ulid, date: NaiveDate) -> Vec<NaiveTime> {
        self.booked
            .get(&(barber_id, date))
            .map(|times| times.iter().copied().collect())
            .unwrap_or_default()
    }
}
