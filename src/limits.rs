use crate::model::Ms;

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_CLAIMS_PER_RESOURCE: usize = 50_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PURPOSE_LEN: usize = 1024;
pub const MAX_DESCRIPTION_LEN: usize = 4096;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single reservation may not span more than 366 days.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
