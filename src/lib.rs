pub mod config;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod unit;
pub mod wal;

pub use config::EngineConfig;
pub use directory::{Directory, StaticDirectory};
pub use engine::{Engine, EngineError};
pub use model::{
    Appointment, AppointmentRules, AppointmentStatus, BookingCandidate, CancelReason,
    ClientCounters, DayHours, Slot, SlotAvailability, SlotKey, WorkingSchedule,
};
pub use unit::UnitManager;
