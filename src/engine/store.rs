use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::{Mutex, MutexGuard};
use ulid::Ulid;

use crate::layout::SeatMap;
use crate::model::*;

use super::sessions::SessionIndex;

/// Authoritative per-seat state of one showtime.
///
/// Each seat sits behind its own mutex, so unrelated seats never contend.
/// Multi-seat batches lock in `SeatId` order, which rules out lock cycles.
#[derive(Debug)]
pub struct ShowtimeSeats {
    pub showtime_id: String,
    pub screen_id: Ulid,
    seats: BTreeMap<SeatId, Mutex<SeatState>>,
}

/// Precondition of a compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected<'a> {
    /// Available, a lapsed hold, or a live hold by this same token (re-hold).
    Holdable(&'a str),
    /// Live hold by this token.
    HeldBy(&'a str),
    /// Held, with expiry at or before the batch clock.
    Lapsed,
    /// Booked under this booking.
    BookedBy(Ulid),
}

impl Expected<'_> {
    pub fn matches(&self, current: &SeatState, now: Ms) -> bool {
        match self {
            Expected::Holdable(token) => match current {
                SeatState::Available => true,
                SeatState::Held { holder, expires_at } => *expires_at <= now || holder == token,
                SeatState::Booked { .. } | SeatState::Disabled => false,
            },
            Expected::HeldBy(token) => current.is_live_hold_of(token, now),
            Expected::Lapsed => current.is_lapsed(now),
            Expected::BookedBy(id) => {
                matches!(current, SeatState::Booked { booking_id } if booking_id == id)
            }
        }
    }
}

impl ShowtimeSeats {
    /// Fresh state for a showtime: every seat available, or disabled per the map.
    pub fn from_map(showtime_id: &str, map: &SeatMap) -> Self {
        let seats = map
            .seat_ids()
            .map(|id| {
                let state = if map.is_disabled(&id) {
                    SeatState::Disabled
                } else {
                    SeatState::Available
                };
                (id, state)
            })
            .collect::<Vec<_>>();
        Self::from_states(showtime_id.to_string(), map.screen_id, seats)
    }

    pub fn from_states(
        showtime_id: String,
        screen_id: Ulid,
        seats: Vec<(SeatId, SeatState)>,
    ) -> Self {
        Self {
            showtime_id,
            screen_id,
            seats: seats.into_iter().map(|(id, s)| (id, Mutex::new(s))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn contains(&self, seat: &SeatId) -> bool {
        self.seats.contains_key(seat)
    }

    /// Current state of each requested seat. Locks one seat at a time.
    pub async fn get(&self, seat_ids: &[SeatId]) -> HashMap<SeatId, SeatState> {
        let mut out = HashMap::with_capacity(seat_ids.len());
        for id in seat_ids {
            if let Some(slot) = self.seats.get(id) {
                out.insert(id.clone(), slot.lock().await.clone());
            }
        }
        out
    }

    /// Every seat with its state, one seat locked at a time.
    pub async fn read_all(&self) -> Vec<(SeatId, SeatState)> {
        let mut out = Vec::with_capacity(self.seats.len());
        for (id, slot) in &self.seats {
            out.push((id.clone(), slot.lock().await.clone()));
        }
        out
    }

    pub async fn lapsed_seats(&self, now: Ms) -> BTreeSet<SeatId> {
        let mut out = BTreeSet::new();
        for (id, slot) in &self.seats {
            if slot.lock().await.is_lapsed(now) {
                out.insert(id.clone());
            }
        }
        out
    }

    /// Lock the given seats in order. Unknown ids are returned as the error.
    pub async fn lock_batch(
        &self,
        seat_ids: &BTreeSet<SeatId>,
        now: Ms,
    ) -> Result<SeatBatch<'_>, Vec<SeatId>> {
        let unknown: Vec<SeatId> = seat_ids
            .iter()
            .filter(|id| !self.contains(id))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(unknown);
        }
        let mut slots = BTreeMap::new();
        for id in seat_ids {
            if let Some(slot) = self.seats.get(id) {
                slots.insert(id.clone(), slot.lock().await);
            }
        }
        Ok(SeatBatch {
            now,
            slots,
            staged: Vec::new(),
        })
    }

    /// Direct access for replay, where the engine is the sole owner.
    pub(super) fn slot_mut(&mut self, seat: &SeatId) -> Option<&mut SeatState> {
        self.seats.get_mut(seat).map(Mutex::get_mut)
    }
}

/// A set of locked seats plus the compare-and-set results staged against
/// them. Nothing staged is visible to anyone until [`SeatBatch::apply`];
/// dropping the batch discards it.
pub struct SeatBatch<'a> {
    now: Ms,
    slots: BTreeMap<SeatId, MutexGuard<'a, SeatState>>,
    staged: Vec<(SeatId, SeatState)>,
}

impl SeatBatch<'_> {
    pub fn now(&self) -> Ms {
        self.now
    }

    pub fn seat_ids(&self) -> impl Iterator<Item = &SeatId> {
        self.slots.keys()
    }

    pub fn current(&self, seat: &SeatId) -> Option<&SeatState> {
        self.slots.get(seat).map(|g| &**g)
    }

    /// Stage `next` for `seat` if its current state satisfies `expected`.
    /// A false return is contention, not an error.
    pub fn compare_and_set(
        &mut self,
        seat: &SeatId,
        expected: Expected<'_>,
        next: SeatState,
    ) -> bool {
        let Some(current) = self.slots.get(seat) else {
            return false;
        };
        if !expected.matches(current, self.now) {
            return false;
        }
        self.staged.retain(|(id, _)| id != seat);
        self.staged.push((seat.clone(), next));
        true
    }

    pub fn rollback(&mut self) {
        self.staged.clear();
    }

    pub fn staged(&self) -> &[(SeatId, SeatState)] {
        &self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Publish staged changes and update the session registry. Returns the
    /// changes applied. The seats stay locked until the batch is dropped.
    pub(super) fn apply(
        &mut self,
        sessions: &SessionIndex,
        showtime_id: &str,
    ) -> Vec<(SeatId, SeatState)> {
        let staged = std::mem::take(&mut self.staged);
        for (seat, next) in &staged {
            if let Some(slot) = self.slots.get_mut(seat) {
                sessions.record(showtime_id, seat, &**slot, next, self.now);
                **slot = next.clone();
            }
        }
        staged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seats(ids: &[&str]) -> BTreeSet<SeatId> {
        ids.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn showtime() -> ShowtimeSeats {
        ShowtimeSeats::from_states(
            "show-1".into(),
            Ulid::new(),
            vec![
                ("A1".parse().unwrap(), SeatState::Available),
                ("A2".parse().unwrap(), SeatState::Available),
                ("A3".parse().unwrap(), SeatState::Disabled),
            ],
        )
    }

    fn held(token: &str, expires_at: Ms) -> SeatState {
        SeatState::Held {
            holder: token.into(),
            expires_at,
        }
    }

    #[test]
    fn expectations() {
        let live = held("s1", 100);
        assert!(Expected::Holdable("s2").matches(&SeatState::Available, 50));
        assert!(!Expected::Holdable("s2").matches(&live, 50));
        assert!(Expected::Holdable("s1").matches(&live, 50));
        assert!(Expected::Holdable("s2").matches(&live, 100));
        assert!(!Expected::Holdable("s1").matches(&SeatState::Disabled, 50));

        assert!(Expected::HeldBy("s1").matches(&live, 99));
        assert!(!Expected::HeldBy("s1").matches(&live, 100));
        assert!(!Expected::HeldBy("s2").matches(&live, 50));

        assert!(Expected::Lapsed.matches(&live, 100));
        assert!(!Expected::Lapsed.matches(&SeatState::Available, 100));

        let id = Ulid::new();
        assert!(Expected::BookedBy(id).matches(&SeatState::Booked { booking_id: id }, 0));
        assert!(!Expected::BookedBy(Ulid::new()).matches(&SeatState::Booked { booking_id: id }, 0));
    }

    #[tokio::test]
    async fn lock_batch_reports_unknown_seats() {
        let st = showtime();
        let err = st.lock_batch(&seats(&["A1", "B7"]), 0).await.err().unwrap();
        assert_eq!(err, vec!["B7".parse::<SeatId>().unwrap()]);
    }

    #[tokio::test]
    async fn staged_changes_invisible_until_applied() {
        let st = showtime();
        let sessions = SessionIndex::new();
        let a1: SeatId = "A1".parse().unwrap();
        {
            let mut batch = st.lock_batch(&seats(&["A1", "A2"]), 0).await.unwrap();
            assert!(batch.compare_and_set(&a1, Expected::Holdable("s1"), held("s1", 10)));
            batch.rollback();
            assert!(batch.is_empty());
        }
        assert_eq!(st.get(&[a1.clone()]).await[&a1], SeatState::Available);

        let applied = {
            let mut batch = st.lock_batch(&seats(&["A1"]), 0).await.unwrap();
            assert!(batch.compare_and_set(&a1, Expected::Holdable("s1"), held("s1", 10)));
            let applied = batch.apply(&sessions, "show-1");
            assert!(batch.is_empty());
            assert_eq!(batch.current(&a1), Some(&held("s1", 10)));
            applied
        };
        assert_eq!(applied.len(), 1);
        assert_eq!(st.get(&[a1.clone()]).await[&a1], held("s1", 10));
        assert!(sessions.get("show-1", "s1").is_some());
    }

    #[tokio::test]
    async fn disabled_seat_never_claimable() {
        let st = showtime();
        let a3: SeatId = "A3".parse().unwrap();
        let mut batch = st.lock_batch(&seats(&["A3"]), 0).await.unwrap();
        assert!(!batch.compare_and_set(&a3, Expected::Holdable("s1"), held("s1", 10)));
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn lapsed_seats_scan() {
        let st = ShowtimeSeats::from_states(
            "show-1".into(),
            Ulid::new(),
            vec![
                ("A1".parse().unwrap(), held("s1", 10)),
                ("A2".parse().unwrap(), held("s2", 50)),
            ],
        );
        assert_eq!(st.lapsed_seats(10).await, seats(&["A1"]));
        assert_eq!(st.lapsed_seats(60).await.len(), 2);
    }
}
