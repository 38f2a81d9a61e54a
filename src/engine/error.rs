use ulid::Ulid;

use crate::layout::LayoutError;
use crate::model::SeatId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Held or booked by someone else at hold time.
    Unavailable,
    /// The caller's own hold lapsed before confirm/extend.
    HoldExpired,
}

/// Expected outcome of contention: the named seats could not be claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub reason: ConflictReason,
    pub seat_ids: Vec<SeatId>,
}

#[derive(Debug)]
pub enum EngineError {
    ShowtimeNotFound(String),
    ScreenNotFound(Ulid),
    BookingNotFound(Ulid),
    UnknownSeats(Vec<SeatId>),
    Conflict(Conflict),
    /// Confirm found seats the caller never held and no expiry explains it.
    Integrity {
        showtime_id: String,
        seat_ids: Vec<SeatId>,
    },
    Layout(LayoutError),
    StaleVersion {
        current: u64,
        submitted: u64,
    },
    /// Geometry edit on a screen whose showtimes already carry seat state.
    LayoutLocked(Ulid),
    ScreenInUse(Ulid),
    BookingCancelled(Ulid),
    AlreadyExists(String),
    InvalidRequest(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ShowtimeNotFound(id) => write!(f, "showtime not found: {id}"),
            EngineError::ScreenNotFound(id) => write!(f, "screen not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::UnknownSeats(ids) => write!(f, "unknown seats: {}", join(ids)),
            EngineError::Conflict(c) => match c.reason {
                ConflictReason::Unavailable => {
                    write!(f, "seats no longer available: {}", join(&c.seat_ids))
                }
                ConflictReason::HoldExpired => {
                    write!(f, "hold expired for seats: {}", join(&c.seat_ids))
                }
            },
            EngineError::Integrity { showtime_id, seat_ids } => {
                write!(f, "holder mismatch on showtime {showtime_id} for seats {}", join(seat_ids))
            }
            EngineError::Layout(e) => write!(f, "{e}"),
            EngineError::StaleVersion { current, submitted } => {
                write!(
                    f,
                    "screen was modified (version {submitted} is stale, current is {current})"
                )
            }
            EngineError::LayoutLocked(id) => {
                write!(
                    f,
                    "screen {id} has initialized showtimes; \
                     rows, seats and disabled seats cannot change"
                )
            }
            EngineError::ScreenInUse(id) => write!(f, "screen {id} has scheduled showtimes"),
            EngineError::BookingCancelled(id) => write!(f, "booking {id} is already cancelled"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<LayoutError> for EngineError {
    fn from(e: LayoutError) -> Self {
        EngineError::Layout(e)
    }
}

fn join(ids: &[SeatId]) -> String {
    ids.iter().map(SeatId::as_str).collect::<Vec<_>>().join(", ")
}
