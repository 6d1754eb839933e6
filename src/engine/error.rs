use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::AppointmentStatus;

/// Every expected, recoverable outcome of a booking operation. Business-rule
/// rejections are values, never panics; only `WalError` is infrastructure.
#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    BarberUnknown(Ulid),
    // Rule violations
    AdvanceTooSoon,
    AdvanceTooFar,
    DailyLimitExceeded,
    ClientBlocked { until: NaiveDate },
    CancellationLimitExceeded,
    CancelTooLate,
    RescheduleTooLate,
    // Slot state
    SlotUnavailable,
    SlotContended,
    // Appointment state machine
    AlreadyCancelled(Ulid),
    InvalidTransition { id: Ulid, from: AppointmentStatus },
    AlreadyRated(Ulid),
    InvalidRating(u8),
    // Credits
    InsufficientCredit(&'static str),
    LimitExceeded(&'static str),
    // Infrastructure
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "appointment not found: {id}"),
            EngineError::BarberUnknown(id) => write!(f, "no working schedule for barber: {id}"),
            EngineError::AdvanceTooSoon => write!(f, "slot is below the minimum advance notice"),
            EngineError::AdvanceTooFar => write!(f, "slot is beyond the maximum advance window"),
            EngineError::DailyLimitExceeded => {
                write!(f, "client already at the daily appointment limit")
            }
            EngineError::ClientBlocked { until } => {
                write!(f, "client blocked by no-show penalty until {until}")
            }
            EngineError::CancellationLimitExceeded => {
                write!(f, "client reached the monthly cancellation limit")
            }
            EngineError::CancelTooLate => write!(f, "too close to the appointment to cancel"),
            EngineError::RescheduleTooLate => {
                write!(f, "too close to the appointment to reschedule")
            }
            EngineError::SlotUnavailable => write!(f, "slot already booked or outside working hours"),
            EngineError::SlotContended => write!(f, "slot lock not acquired within the wait bound"),
            EngineError::AlreadyCancelled(id) => write!(f, "appointment already cancelled: {id}"),
            EngineError::InvalidTransition { id, from } => {
                write!(f, "invalid transition for appointment {id} in status {from:?}")
            }
            EngineError::AlreadyRated(id) => write!(f, "appointment already rated: {id}"),
            EngineError::InvalidRating(r) => write!(f, "rating out of range 1..=5: {r}"),
            EngineError::InsufficientCredit(kind) => write!(f, "insufficient {kind} credit"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
