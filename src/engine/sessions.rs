use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;

use crate::model::*;

/// How long an expired hold stays on record for confirm-time diagnosis.
pub const LAPSED_RETENTION_MS: Ms = 3_600_000;

type SessionKey = (String, String);

/// Derived registry of live holds per (showtime, holder token).
///
/// Never persisted: replay rebuilds it from the same seat transitions that
/// maintain it live. Besides live sessions it remembers which seats a token
/// lost to expiry, so a late confirm can be told "your hold expired" rather
/// than treated as an integrity failure.
pub struct SessionIndex {
    live: DashMap<SessionKey, BTreeMap<SeatId, Ms>>,
    lapsed: DashMap<SessionKey, (BTreeSet<SeatId>, Ms)>,
}

impl Default for SessionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIndex {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
            lapsed: DashMap::new(),
        }
    }

    /// Account for one seat moving from `prev` to `next` at time `at`.
    /// Called inside the seat's critical section.
    pub fn record(
        &self,
        showtime_id: &str,
        seat: &SeatId,
        prev: &SeatState,
        next: &SeatState,
        at: Ms,
    ) {
        if let SeatState::Held { holder, expires_at } = prev {
            let still_held = matches!(next, SeatState::Held { holder: h, .. } if h == holder);
            if !still_held {
                let key = (showtime_id.to_string(), holder.clone());
                if let Some(mut seats) = self.live.get_mut(&key) {
                    seats.remove(seat);
                }
                self.live.remove_if(&key, |_, seats| seats.is_empty());
                let lost_to_expiry =
                    *expires_at <= at && !matches!(next, SeatState::Booked { .. });
                if lost_to_expiry {
                    let mut entry = self
                        .lapsed
                        .entry(key)
                        .or_insert_with(|| (BTreeSet::new(), at));
                    entry.0.insert(seat.clone());
                    entry.1 = at;
                }
            }
        }

        if let SeatState::Held { holder, expires_at } = next {
            let key = (showtime_id.to_string(), holder.clone());
            self.live
                .entry(key.clone())
                .or_default()
                .insert(seat.clone(), *expires_at);

            if let Some(mut entry) = self.lapsed.get_mut(&key) {
                entry.0.remove(seat);
            }
            self.lapsed.remove_if(&key, |_, e| e.0.is_empty());
        }
    }

    /// The live session, if any of its seats are still held. Its expiry is
    /// the earliest seat lease: past that point the session can no longer
    /// be confirmed as a whole.
    pub fn get(&self, showtime_id: &str, token: &str) -> Option<HoldSession> {
        let seats = self
            .live
            .get(&(showtime_id.to_string(), token.to_string()))?;
        let expires_at = seats.values().copied().min()?;
        Some(HoldSession {
            holder_token: token.to_string(),
            showtime_id: showtime_id.to_string(),
            seat_ids: seats.keys().cloned().collect(),
            expires_at,
        })
    }

    /// Whether `token` lost `seat` to expiry within the retention window.
    pub fn lost_to_expiry(&self, showtime_id: &str, token: &str, seat: &SeatId) -> bool {
        self.lapsed
            .get(&(showtime_id.to_string(), token.to_string()))
            .is_some_and(|e| e.0.contains(seat))
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Drop expiry records older than the retention window.
    pub fn prune_lapsed(&self, now: Ms) {
        self.lapsed.retain(|_, (_, at)| now - *at < LAPSED_RETENTION_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn seat(s: &str) -> SeatId {
        s.parse().unwrap()
    }

    fn held(token: &str, expires_at: Ms) -> SeatState {
        SeatState::Held {
            holder: token.into(),
            expires_at,
        }
    }

    #[test]
    fn hold_then_release_removes_session() {
        let idx = SessionIndex::new();
        idx.record("show", &seat("A2"), &SeatState::Available, &held("s1", 100), 0);
        idx.record("show", &seat("A1"), &SeatState::Available, &held("s1", 100), 0);

        let session = idx.get("show", "s1").unwrap();
        assert_eq!(session.seat_ids, vec![seat("A1"), seat("A2")]);
        assert_eq!(session.expires_at, 100);

        idx.record("show", &seat("A1"), &held("s1", 100), &SeatState::Available, 10);
        assert_eq!(idx.get("show", "s1").unwrap().seat_ids, vec![seat("A2")]);
        idx.record("show", &seat("A2"), &held("s1", 100), &SeatState::Available, 10);
        assert!(idx.get("show", "s1").is_none());
        assert!(!idx.lost_to_expiry("show", "s1", &seat("A1")));
    }

    #[test]
    fn expiry_is_remembered_until_pruned() {
        let idx = SessionIndex::new();
        idx.record("show", &seat("A1"), &SeatState::Available, &held("s1", 100), 0);
        idx.record("show", &seat("A1"), &held("s1", 100), &SeatState::Available, 100);

        assert!(idx.get("show", "s1").is_none());
        assert!(idx.lost_to_expiry("show", "s1", &seat("A1")));
        assert!(!idx.lost_to_expiry("show", "s2", &seat("A1")));

        idx.prune_lapsed(100 + LAPSED_RETENTION_MS);
        assert!(!idx.lost_to_expiry("show", "s1", &seat("A1")));
    }

    #[test]
    fn takeover_of_lapsed_seat_records_expiry_for_old_holder() {
        let idx = SessionIndex::new();
        idx.record("show", &seat("A1"), &SeatState::Available, &held("s1", 100), 0);
        idx.record("show", &seat("A1"), &held("s1", 100), &held("s2", 900), 150);

        assert!(idx.lost_to_expiry("show", "s1", &seat("A1")));
        assert_eq!(idx.get("show", "s2").unwrap().seat_ids, vec![seat("A1")]);
        assert_eq!(idx.live_count(), 1);
    }

    #[test]
    fn booking_is_not_expiry() {
        let idx = SessionIndex::new();
        idx.record("show", &seat("A1"), &SeatState::Available, &held("s1", 100), 0);
        idx.record(
            "show",
            &seat("A1"),
            &held("s1", 100),
            &SeatState::Booked { booking_id: Ulid::new() },
            50,
        );
        assert!(idx.get("show", "s1").is_none());
        assert!(!idx.lost_to_expiry("show", "s1", &seat("A1")));
    }

    #[test]
    fn rehold_clears_expiry_record() {
        let idx = SessionIndex::new();
        idx.record("show", &seat("A1"), &SeatState::Available, &held("s1", 100), 0);
        idx.record("show", &seat("A1"), &held("s1", 100), &SeatState::Available, 100);
        idx.record("show", &seat("A1"), &SeatState::Available, &held("s1", 800), 200);
        assert!(!idx.lost_to_expiry("show", "s1", &seat("A1")));
        assert_eq!(idx.get("show", "s1").unwrap().expires_at, 800);
    }

    #[test]
    fn session_expiry_tracks_earliest_live_lease() {
        let idx = SessionIndex::new();
        idx.record("show", &seat("A1"), &SeatState::Available, &held("s1", 900), 0);
        idx.record("show", &seat("A2"), &SeatState::Available, &held("s1", 500), 0);
        assert_eq!(idx.get("show", "s1").unwrap().expires_at, 500);

        // Shortening a lease shortens the session.
        idx.record("show", &seat("A1"), &held("s1", 900), &held("s1", 200), 100);
        assert_eq!(idx.get("show", "s1").unwrap().expires_at, 200);

        // Releasing the earliest seat moves the expiry to the next one.
        idx.record("show", &seat("A1"), &held("s1", 200), &SeatState::Available, 150);
        let session = idx.get("show", "s1").unwrap();
        assert_eq!(session.seat_ids, vec![seat("A2")]);
        assert_eq!(session.expires_at, 500);
    }
}
