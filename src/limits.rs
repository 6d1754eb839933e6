//! Hard caps protecting the engine from unbounded input.

/// Widest date range a slot query may cover.
pub const MAX_QUERY_RANGE_DAYS: i64 = 92;

/// Upper bound on appointments retained per engine before compaction is
/// strongly recommended.
pub const MAX_APPOINTMENTS_PER_UNIT: usize = 1_000_000;

/// Per-unit engines managed by one `UnitManager`.
pub const MAX_UNITS: usize = 1_000;

pub const MAX_UNIT_NAME_LEN: usize = 256;

/// Default bounded wait for the per-slot lock before rejecting with
/// `SlotContended`.
pub const DEFAULT_LOCK_WAIT_MS: u64 = 250;

/// Default lifetime of an unconfirmed pending booking.
pub const DEFAULT_PENDING_TTL_MINUTES: i64 = 15;

/// Plan credits grantable in a single call.
pub const MAX_CREDIT_GRANT: u32 = 1_000;
