use std::time::Duration;

/// System-wide ceiling of visitor check-ins per calendar date.
pub const MAX_VISITS_PER_DAY: u64 = 400;

/// Forecast horizon bounds, in business days.
pub const MIN_FORECAST_DAYS: u32 = 1;
pub const MAX_FORECAST_DAYS: u32 = 28 * 4;
pub const DEFAULT_FORECAST_DAYS: u32 = 7;

/// Longest start/end range a single booking request may span, in calendar days.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Most explicit dates accepted in one booking request.
pub const MAX_DATES_PER_REQUEST: usize = 366;

/// Contact tracing looks back this many days from today.
pub const CONTACT_TRACE_WINDOW_DAYS: u64 = 14;

/// Retention sweep cadence when the configured interval is unusable.
pub const DEFAULT_TASK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Retention age when the configured age is unusable.
pub const DEFAULT_RETENTION_DAYS: i64 = 14;

/// Upper bound on a single store round-trip unless configured otherwise.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest request line the wire protocol accepts.
pub const MAX_LINE_LEN: usize = 64 * 1024;

pub const MAX_ID_LEN: usize = 128;
