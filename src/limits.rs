use crate::model::Ms;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 64;

pub const MAX_HOSTS_PER_TENANT: usize = 100_000;
pub const MAX_INTERVALS_PER_HOST: usize = 50_000;

pub const MAX_SLUG_LEN: usize = 64;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_GUEST_NAME_LEN: usize = 100;
pub const MAX_NOTE_LEN: usize = 4_096;

/// Unix epoch; negative timestamps are rejected.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// One year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
/// Availability windows wider than this are rejected.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
