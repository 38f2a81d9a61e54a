use serde::Serialize;

use crate::layout::SeatMap;
use crate::model::*;
use crate::notify::SeatChange;

use super::Engine;

/// A seat's status as seen by one caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatView {
    Available,
    HeldByMe,
    HeldByOther,
    Booked,
    Disabled,
}

impl SeatView {
    /// Translate raw state relative to `viewer`. Lapsed holds read as available.
    pub fn of(state: &SeatState, viewer: Option<&str>, now: Ms) -> Self {
        match state {
            SeatState::Available => SeatView::Available,
            SeatState::Held { .. } if state.is_lapsed(now) => SeatView::Available,
            SeatState::Held { holder, .. } if Some(holder.as_str()) == viewer => SeatView::HeldByMe,
            SeatState::Held { .. } => SeatView::HeldByOther,
            SeatState::Booked { .. } => SeatView::Booked,
            SeatState::Disabled => SeatView::Disabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatSnapshot {
    pub seat_id: SeatId,
    pub row: char,
    pub number: u8,
    pub view: SeatView,
    pub category_id: Option<String>,
    /// 0 when the seat has no category.
    pub price: f64,
}

fn snapshot_seat(
    seat_id: SeatId,
    state: &SeatState,
    map: Option<&SeatMap>,
    viewer: Option<&str>,
    now: Ms,
) -> SeatSnapshot {
    SeatSnapshot {
        row: seat_id.row(),
        number: seat_id.column(),
        view: SeatView::of(state, viewer, now),
        category_id: map.and_then(|m| m.assignments.get(&seat_id).cloned()),
        price: map.map_or(0.0, |m| m.price_of(&seat_id)),
        seat_id,
    }
}

impl Engine {
    /// Caller-relative view of every seat, in row then column order. Empty
    /// when the showtime has no seat state yet. Categories and prices come
    /// from the screen's current layout.
    pub async fn snapshot(&self, showtime_id: &str, viewer: Option<&str>) -> Vec<SeatSnapshot> {
        let Some(showtime) = self.showtime(showtime_id) else {
            return Vec::new();
        };
        let states = showtime.read_all().await;
        let now = now_ms();
        let map = self.screens.get(&showtime.screen_id).map(|e| e.value().clone());

        let mut out: Vec<SeatSnapshot> = states
            .into_iter()
            .map(|(id, state)| snapshot_seat(id, &state, map.as_ref(), viewer, now))
            .collect();
        out.sort_by_key(|s| (s.row, s.number));
        out
    }

    /// Raw state of the given seats. Seats the showtime doesn't have are absent.
    pub async fn seat_states(
        &self,
        showtime_id: &str,
        seat_ids: &[SeatId],
    ) -> Vec<(SeatId, SeatState)> {
        let Some(showtime) = self.showtime(showtime_id) else {
            return Vec::new();
        };
        let mut found = showtime.get(seat_ids).await.into_iter().collect::<Vec<_>>();
        found.sort_by_key(|(id, _)| (id.row(), id.column()));
        found
    }

    /// Translate a pushed change into `viewer`'s terms.
    pub fn view_change(&self, change: &SeatChange, viewer: Option<&str>) -> Vec<SeatSnapshot> {
        let screen_id = self.schedule.get(&change.showtime_id).map(|e| *e.value());
        let map = screen_id.and_then(|id| self.screens.get(&id).map(|e| e.value().clone()));
        let now = now_ms();
        change
            .changes
            .iter()
            .map(|(id, state)| snapshot_seat(id.clone(), state, map.as_ref(), viewer, now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn views_are_caller_relative() {
        let held = SeatState::Held {
            holder: "me".into(),
            expires_at: 100,
        };
        assert_eq!(SeatView::of(&held, Some("me"), 50), SeatView::HeldByMe);
        assert_eq!(SeatView::of(&held, Some("you"), 50), SeatView::HeldByOther);
        assert_eq!(SeatView::of(&held, None, 50), SeatView::HeldByOther);
        assert_eq!(SeatView::of(&held, Some("me"), 100), SeatView::Available);
        assert_eq!(
            SeatView::of(&SeatState::Booked { booking_id: Ulid::new() }, Some("me"), 0),
            SeatView::Booked
        );
        assert_eq!(SeatView::of(&SeatState::Disabled, None, 0), SeatView::Disabled);
    }
}
