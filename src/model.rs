use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::layout::SeatMap;

/// Unix milliseconds; the only time type.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

/// Seat identifier `{row}{column}`, e.g. `A1`, `B12`. Columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatId(String);

impl SeatId {
    pub fn new(row: char, column: u8) -> Self {
        Self(format!("{row}{column}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn row(&self) -> char {
        self.0.chars().next().unwrap_or('?')
    }

    pub fn column(&self) -> u8 {
        self.0[1..].parse().unwrap_or(0)
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSeatId(pub String);

impl fmt::Display for InvalidSeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid seat id: {:?}", self.0)
    }
}

impl std::error::Error for InvalidSeatId {}

impl FromStr for SeatId {
    type Err = InvalidSeatId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let row = chars
            .next()
            .filter(|c| c.is_ascii_uppercase())
            .ok_or_else(|| InvalidSeatId(s.to_string()))?;
        let digits = chars.as_str();
        // Canonical form only ("A1", never "A01" or "A+1"): ids are join keys.
        if digits.is_empty()
            || digits.starts_with('0')
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(InvalidSeatId(s.to_string()));
        }
        let column: u8 = digits.parse().map_err(|_| InvalidSeatId(s.to_string()))?;
        Ok(Self::new(row, column))
    }
}

/// Status discriminant of a seat, without hold metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Available,
    Held,
    Booked,
    Disabled,
}

/// Live state of one seat of one showtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SeatState {
    Available,
    /// Exclusive lease by one holder token.
    Held { holder: String, expires_at: Ms },
    /// Terminal unless an explicit cancellation releases it.
    Booked { booking_id: Ulid },
    /// Structurally unusable; only reachable from initialization.
    Disabled,
}

impl SeatState {
    pub fn status(&self) -> SeatStatus {
        match self {
            SeatState::Available => SeatStatus::Available,
            SeatState::Held { .. } => SeatStatus::Held,
            SeatState::Booked { .. } => SeatStatus::Booked,
            SeatState::Disabled => SeatStatus::Disabled,
        }
    }

    /// A hold whose expiry is at or before `now`.
    pub fn is_lapsed(&self, now: Ms) -> bool {
        matches!(self, SeatState::Held { expires_at, .. } if *expires_at <= now)
    }

    pub fn is_live_hold_of(&self, token: &str, now: Ms) -> bool {
        matches!(
            self,
            SeatState::Held { holder, expires_at } if holder == token && *expires_at > now
        )
    }

    /// Status with lapsed holds reported as available.
    pub fn effective_status(&self, now: Ms) -> SeatStatus {
        if self.is_lapsed(now) {
            SeatStatus::Available
        } else {
            self.status()
        }
    }
}

/// Derived record of one checkout attempt's live holds on one showtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldSession {
    pub holder_token: String,
    pub showtime_id: String,
    pub seat_ids: Vec<SeatId>,
    pub expires_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub showtime_id: String,
    pub seat_ids: Vec<SeatId>,
    pub holder_token: String,
    pub customer: Customer,
    pub total_amount: f64,
    pub ticket_number: String,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub cancellation_reason: Option<String>,
    pub refund_amount: Option<f64>,
    pub cancelled_at: Option<Ms>,
}

/// The event types. This is the WAL record format.
///
/// A multi-seat batch is a single `SeatsChanged`, so replay applies it whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ScreenSaved {
        map: SeatMap,
    },
    ScreenDeleted {
        id: Ulid,
    },
    ShowtimeScheduled {
        showtime_id: String,
        screen_id: Ulid,
    },
    ShowtimeInitialized {
        showtime_id: String,
        screen_id: Ulid,
        seats: Vec<(SeatId, SeatState)>,
    },
    SeatsChanged {
        showtime_id: String,
        changes: Vec<(SeatId, SeatState)>,
        /// Booking created or updated in the same commit.
        booking: Option<Booking>,
        /// Commit time; replay uses it to tell expiry apart from release.
        at: Ms,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_id_roundtrip() {
        let id = SeatId::new('B', 12);
        assert_eq!(id.as_str(), "B12");
        assert_eq!(id.row(), 'B');
        assert_eq!(id.column(), 12);
        assert_eq!("B12".parse::<SeatId>().unwrap(), id);
    }

    #[test]
    fn seat_id_rejects_malformed() {
        for bad in ["", "A", "a1", "1A", "A0", "A01", "AA1", "A-1", "A+1", "A300"] {
            assert!(bad.parse::<SeatId>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn seat_ids_order_by_row_then_text() {
        let mut ids = vec![SeatId::new('B', 1), SeatId::new('A', 2), SeatId::new('A', 1)];
        ids.sort();
        assert_eq!(ids[0].as_str(), "A1");
        assert_eq!(ids[2].as_str(), "B1");
    }

    #[test]
    fn lapsed_hold_reads_as_available() {
        let held = SeatState::Held {
            holder: "s1".into(),
            expires_at: 1_000,
        };
        assert_eq!(held.effective_status(999), SeatStatus::Held);
        assert_eq!(held.effective_status(1_000), SeatStatus::Available);
        assert!(held.is_live_hold_of("s1", 999));
        assert!(!held.is_live_hold_of("s1", 1_000));
        assert!(!held.is_live_hold_of("s2", 999));
    }

    #[test]
    fn booked_and_disabled_never_lapse() {
        let booked = SeatState::Booked {
            booking_id: Ulid::new(),
        };
        assert!(!booked.is_lapsed(i64::MAX));
        assert_eq!(SeatState::Disabled.effective_status(i64::MAX), SeatStatus::Disabled);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::SeatsChanged {
            showtime_id: "show-1".into(),
            changes: vec![(
                SeatId::new('A', 1),
                SeatState::Held {
                    holder: "s1".into(),
                    expires_at: 42,
                },
            )],
            booking: None,
            at: 7,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
