use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::{Slot, SlotAvailability, WorkingSchedule};

// ── Slot grid ────────────────────────────────────────────────────

/// Enumerate the candidate slots for one barber and date, all tagged free.
///
/// Partitions `[open, close)` into consecutive `slot_minutes` intervals in
/// ascending order. A trailing partial interval is dropped — it is never
/// offered. Pure and deterministic: same inputs, same sequence.
pub fn generate_slots(
    barber_id: Ulid,
    date: NaiveDate,
    schedule: &WorkingSchedule,
    slot_minutes: u32,
) -> Vec<Slot> {
    let Some((open, close)) = schedule.hours_for(date.weekday()) else {
        return Vec::new();
    };
    if slot_minutes == 0 || close <= open {
        return Vec::new();
    }

    let step = Duration::minutes(slot_minutes as i64);
    let count = ((close - open).num_minutes() / slot_minutes as i64) as usize;
    let mut slots = Vec::with_capacity(count);
    let mut start = open;
    // NaiveTime addition wraps at midnight, so bound the loop by the
    // remaining span rather than comparing wrapped end times.
    while (close - start).num_minutes() >= slot_minutes as i64 {
        slots.push(Slot {
            barber_id,
            date,
            start,
            duration_minutes: slot_minutes,
            availability: SlotAvailability::Free,
        });
        start = start + step;
    }
    slots
}

/// Whether (date, time) lies on the slot grid for this schedule — i.e. the
/// time is a valid slot start within working hours.
pub fn slot_exists(
    schedule: &WorkingSchedule,
    date: NaiveDate,
    time: NaiveTime,
    slot_minutes: u32,
) -> bool {
    let Some((open, close)) = schedule.hours_for(date.weekday()) else {
        return false;
    };
    if slot_minutes == 0 || time < open {
        return false;
    }
    let offset_seconds = (time - open).num_seconds();
    if offset_seconds % (slot_minutes as i64 * 60) != 0 {
        return false;
    }
    (close - time).num_minutes() >= slot_minutes as i64
}
