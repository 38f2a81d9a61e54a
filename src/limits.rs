use crate::model::Ms;

/// Seats a single hold/release/extend/confirm request may name.
pub const MAX_SEATS_PER_REQUEST: usize = 100;

/// Holder tokens are opaque but bounded.
pub const MAX_TOKEN_LEN: usize = 128;

/// Showtime and category ids are supplied by other services.
pub const MAX_ID_LEN: usize = 64;

/// Single-letter row labels A..=Z.
pub const MIN_ROWS: u8 = 1;
pub const MAX_ROWS: u8 = 26;

pub const MIN_SEATS_PER_ROW: u8 = 1;
pub const MAX_SEATS_PER_ROW: u8 = 50;

pub const MAX_CATEGORIES: usize = 32;

/// Screen names, theatre ids, category names, customer fields.
pub const MAX_NAME_LEN: usize = 128;

pub const MAX_SHOWTIMES: usize = 100_000;

pub const MAX_SCREENS: usize = 10_000;

pub const MIN_HOLD_TTL_MS: Ms = 1_000;

pub const MAX_CANCEL_REASON_LEN: usize = 512;

/// Absolute ceiling; the configured maximum is usually lower.
pub const MAX_HOLD_TTL_MS: Ms = 24 * 3_600_000;

pub const MAX_EMAIL_LEN: usize = 254;
