//! Hold → confirm/release → expire protocol.
//!
//! Every operation locks its seats as one batch, stages a compare-and-set per
//! seat and commits all of them as a single WAL record, or none at all.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::store::Expected;
use super::{
    Conflict, ConflictReason, Engine, EngineError, ShowtimeSeats, seat_set, validate_id,
    validate_token,
};

/// Share of the paid amount returned on cancellation.
pub const REFUND_RATE: f64 = 0.9;

/// `TKT` followed by the last eight characters of the booking ULID, which
/// come from its random component.
fn ticket_number(id: &Ulid) -> String {
    let s = id.to_string();
    format!("TKT{}", &s[s.len() - 8..])
}

fn validate_ttl(ttl_ms: Ms) -> Result<(), EngineError> {
    if ttl_ms < MIN_HOLD_TTL_MS {
        return Err(EngineError::InvalidRequest(format!(
            "hold TTL must be at least {} ms",
            MIN_HOLD_TTL_MS
        )));
    }
    if ttl_ms > MAX_HOLD_TTL_MS {
        return Err(EngineError::LimitExceeded("hold TTL too long"));
    }
    Ok(())
}

fn validate_customer(customer: &Customer) -> Result<(), EngineError> {
    if customer.name.trim().is_empty() {
        return Err(EngineError::InvalidRequest("customer name is required".into()));
    }
    if customer.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    let email = customer.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(EngineError::InvalidRequest("a valid customer email is required".into()));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("customer email too long"));
    }
    if customer.phone.as_ref().is_some_and(|p| p.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("customer phone too long"));
    }
    Ok(())
}

impl Engine {
    /// Claim every requested seat for `token` until `now + ttl_ms`, or none.
    ///
    /// The showtime's seat state is created on first use from its scheduled
    /// screen. A seat is claimable when available, when its hold has lapsed,
    /// or when `token` already holds it (the expiry is refreshed).
    pub async fn request_hold(
        &self,
        showtime_id: &str,
        seat_ids: &[SeatId],
        token: &str,
        ttl_ms: Ms,
    ) -> Result<HoldSession, EngineError> {
        validate_id("showtimeId", showtime_id)?;
        validate_token(token)?;
        validate_ttl(ttl_ms)?;
        let wanted = seat_set(seat_ids)?;
        let showtime = self.initialize_showtime(showtime_id).await?;

        let _gate = self.commit_gate.read().await;
        let now = now_ms();
        let mut batch = showtime.lock_batch(&wanted, now).await.map_err(EngineError::UnknownSeats)?;

        let expires_at = now + ttl_ms;
        let mut unavailable = Vec::new();
        for seat in &wanted {
            let next = SeatState::Held {
                holder: token.to_string(),
                expires_at,
            };
            if !batch.compare_and_set(seat, Expected::Holdable(token), next) {
                unavailable.push(seat.clone());
            }
        }
        if !unavailable.is_empty() {
            batch.rollback();
            metrics::counter!(observability::HOLDS_TOTAL, "outcome" => "conflict").increment(1);
            warn!(showtime_id, token, seats = ?unavailable, "hold rejected: seats unavailable");
            return Err(EngineError::Conflict(Conflict {
                reason: ConflictReason::Unavailable,
                seat_ids: unavailable,
            }));
        }

        self.commit_seats(&showtime, batch, None).await?;
        metrics::counter!(observability::HOLDS_TOTAL, "outcome" => "granted").increment(1);
        debug!(showtime_id, token, seats = wanted.len(), expires_at, "hold granted");

        Ok(self.sessions.get(showtime_id, token).unwrap_or_else(|| HoldSession {
            holder_token: token.to_string(),
            showtime_id: showtime_id.to_string(),
            seat_ids: wanted.into_iter().collect(),
            expires_at,
        }))
    }

    /// Return `token`'s live holds on the given seats to available. Seats the
    /// token no longer holds are skipped. Returns how many were released.
    pub async fn release_hold(
        &self,
        showtime_id: &str,
        token: &str,
        seat_ids: &[SeatId],
    ) -> Result<usize, EngineError> {
        validate_id("showtimeId", showtime_id)?;
        validate_token(token)?;
        let wanted = seat_set(seat_ids)?;
        let Some(showtime) = self.showtime(showtime_id) else {
            return Ok(0);
        };

        let _gate = self.commit_gate.read().await;
        let mut batch = showtime
            .lock_batch(&wanted, now_ms())
            .await
            .map_err(EngineError::UnknownSeats)?;
        for seat in &wanted {
            batch.compare_and_set(seat, Expected::HeldBy(token), SeatState::Available);
        }
        let released = self.commit_seats(&showtime, batch, None).await?.len();
        debug!(showtime_id, token, released, "hold released");
        Ok(released)
    }

    /// Push the expiry of `token`'s live holds out to `now + ttl_ms`. Every
    /// seat must still be held by the token; otherwise nothing changes.
    pub async fn extend_hold(
        &self,
        showtime_id: &str,
        token: &str,
        seat_ids: &[SeatId],
        ttl_ms: Ms,
    ) -> Result<HoldSession, EngineError> {
        validate_id("showtimeId", showtime_id)?;
        validate_token(token)?;
        validate_ttl(ttl_ms)?;
        let wanted = seat_set(seat_ids)?;
        let showtime = self
            .showtime(showtime_id)
            .ok_or_else(|| EngineError::ShowtimeNotFound(showtime_id.to_string()))?;

        let _gate = self.commit_gate.read().await;
        let now = now_ms();
        let mut batch = showtime.lock_batch(&wanted, now).await.map_err(EngineError::UnknownSeats)?;
        let expires_at = now + ttl_ms;
        let mut lost = Vec::new();
        for seat in &wanted {
            let next = SeatState::Held {
                holder: token.to_string(),
                expires_at,
            };
            if !batch.compare_and_set(seat, Expected::HeldBy(token), next) {
                lost.push(seat.clone());
            }
        }
        if !lost.is_empty() {
            batch.rollback();
            return Err(EngineError::Conflict(Conflict {
                reason: ConflictReason::HoldExpired,
                seat_ids: lost,
            }));
        }
        self.commit_seats(&showtime, batch, None).await?;
        debug!(showtime_id, token, expires_at, "hold extended");

        Ok(self.sessions.get(showtime_id, token).unwrap_or_else(|| HoldSession {
            holder_token: token.to_string(),
            showtime_id: showtime_id.to_string(),
            seat_ids: wanted.into_iter().collect(),
            expires_at,
        }))
    }

    /// Convert `token`'s held seats to booked and record the booking, in one
    /// commit. A seat the token does not hold aborts the whole call: as a
    /// hold-expired conflict when expiry accounts for it, otherwise as an
    /// integrity error.
    pub async fn confirm_booking(
        &self,
        showtime_id: &str,
        token: &str,
        seat_ids: &[SeatId],
        customer: Customer,
    ) -> Result<Booking, EngineError> {
        validate_id("showtimeId", showtime_id)?;
        validate_token(token)?;
        validate_customer(&customer)?;
        let wanted = seat_set(seat_ids)?;
        let showtime = self
            .showtime(showtime_id)
            .ok_or_else(|| EngineError::ShowtimeNotFound(showtime_id.to_string()))?;

        let _gate = self.commit_gate.read().await;
        let now = now_ms();
        let mut batch = showtime.lock_batch(&wanted, now).await.map_err(EngineError::UnknownSeats)?;

        let booking_id = Ulid::new();
        let mut expired = Vec::new();
        let mut unexplained = Vec::new();
        for seat in &wanted {
            let booked = SeatState::Booked { booking_id };
            if batch.compare_and_set(seat, Expected::HeldBy(token), booked) {
                continue;
            }
            let own_lapsed = matches!(
                batch.current(seat),
                Some(SeatState::Held { holder, .. }) if holder == token
            );
            if own_lapsed || self.sessions.lost_to_expiry(showtime_id, token, seat) {
                expired.push(seat.clone());
            } else {
                unexplained.push(seat.clone());
            }
        }

        if !unexplained.is_empty() {
            batch.rollback();
            metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "integrity_error")
                .increment(1);
            metrics::counter!(observability::INTEGRITY_ERRORS_TOTAL).increment(1);
            error!(
                showtime_id,
                token,
                seats = ?unexplained,
                "confirm found seats not held by this session and no expiry explains it"
            );
            return Err(EngineError::Integrity {
                showtime_id: showtime_id.to_string(),
                seat_ids: unexplained,
            });
        }
        if !expired.is_empty() {
            batch.rollback();
            metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "hold_expired")
                .increment(1);
            warn!(showtime_id, token, seats = ?expired, "confirm rejected: hold expired");
            return Err(EngineError::Conflict(Conflict {
                reason: ConflictReason::HoldExpired,
                seat_ids: expired,
            }));
        }

        // Prices are read live from the screen's current categories.
        let total_amount = self
            .screens
            .get(&showtime.screen_id)
            .map_or(0.0, |map| wanted.iter().map(|seat| map.price_of(seat)).sum());
        let booking = Booking {
            id: booking_id,
            showtime_id: showtime_id.to_string(),
            seat_ids: wanted.into_iter().collect(),
            holder_token: token.to_string(),
            customer,
            total_amount,
            ticket_number: ticket_number(&booking_id),
            status: BookingStatus::Confirmed,
            created_at: now,
            cancellation_reason: None,
            refund_amount: None,
            cancelled_at: None,
        };
        self.commit_seats(&showtime, batch, Some(booking.clone())).await?;
        metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "confirmed").increment(1);
        info!(
            booking_id = %booking.id,
            ticket = %booking.ticket_number,
            showtime_id,
            seats = booking.seat_ids.len(),
            "booking confirmed"
        );
        Ok(booking)
    }

    /// Release every seat of a booking back to available and mark it
    /// cancelled with a refund. A booking can be cancelled once.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_CANCEL_REASON_LEN) {
            return Err(EngineError::LimitExceeded("cancellation reason too long"));
        }
        let booking = self
            .get_booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let showtime = self
            .showtime(&booking.showtime_id)
            .ok_or_else(|| EngineError::ShowtimeNotFound(booking.showtime_id.clone()))?;
        let seats: BTreeSet<SeatId> = booking.seat_ids.iter().cloned().collect();

        let _gate = self.commit_gate.read().await;
        let now = now_ms();
        let mut batch = showtime.lock_batch(&seats, now).await.map_err(EngineError::UnknownSeats)?;

        // Re-read under the seat locks: a concurrent cancel may have won.
        let booking = self
            .get_booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        if booking.status == BookingStatus::Cancelled {
            return Err(EngineError::BookingCancelled(booking_id));
        }

        let mut mismatched = Vec::new();
        for seat in &seats {
            if !batch.compare_and_set(seat, Expected::BookedBy(booking_id), SeatState::Available) {
                mismatched.push(seat.clone());
            }
        }
        if !mismatched.is_empty() {
            batch.rollback();
            metrics::counter!(observability::INTEGRITY_ERRORS_TOTAL).increment(1);
            error!(
                %booking_id,
                seats = ?mismatched,
                "cancel found seats not booked under this booking"
            );
            return Err(EngineError::Integrity {
                showtime_id: booking.showtime_id.clone(),
                seat_ids: mismatched,
            });
        }

        let cancelled = Booking {
            status: BookingStatus::Cancelled,
            refund_amount: Some(booking.total_amount * REFUND_RATE),
            cancellation_reason: reason,
            cancelled_at: Some(now),
            ..booking
        };
        self.commit_seats(&showtime, batch, Some(cancelled.clone())).await?;
        metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "cancelled").increment(1);
        info!(%booking_id, refund = ?cancelled.refund_amount, "booking cancelled");
        Ok(cancelled)
    }

    /// Return every hold lapsed at `now` to available, one commit per
    /// showtime. Returns the number of seats released.
    pub async fn expire_holds(&self, now: Ms) -> usize {
        let showtimes: Vec<Arc<ShowtimeSeats>> =
            self.showtimes.iter().map(|e| e.value().clone()).collect();
        let mut expired = 0;
        for showtime in showtimes {
            match self.expire_showtime(&showtime, now).await {
                Ok(n) => expired += n,
                Err(e) => {
                    error!(showtime_id = %showtime.showtime_id, error = %e, "expiry sweep failed")
                }
            }
        }
        self.sessions.prune_lapsed(now);
        if expired > 0 {
            metrics::counter!(observability::SEATS_EXPIRED_TOTAL).increment(expired as u64);
        }
        expired
    }

    async fn expire_showtime(
        &self,
        showtime: &ShowtimeSeats,
        now: Ms,
    ) -> Result<usize, EngineError> {
        let candidates = showtime.lapsed_seats(now).await;
        if candidates.is_empty() {
            return Ok(0);
        }
        let _gate = self.commit_gate.read().await;
        let mut batch = showtime
            .lock_batch(&candidates, now)
            .await
            .map_err(EngineError::UnknownSeats)?;
        for seat in &candidates {
            // Re-extended or re-held since the scan: the CAS just misses.
            batch.compare_and_set(seat, Expected::Lapsed, SeatState::Available);
        }
        Ok(self.commit_seats(showtime, batch, None).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_numbers_are_tkt_plus_eight_uppercase_alphanumerics() {
        let t = ticket_number(&Ulid::new());
        assert_eq!(t.len(), 11);
        assert!(t.starts_with("TKT"));
        assert!(t[3..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn customer_validation() {
        let ok = Customer {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            phone: None,
        };
        assert!(validate_customer(&ok).is_ok());
        assert!(validate_customer(&Customer { name: " ".into(), ..ok.clone() }).is_err());
        assert!(validate_customer(&Customer { email: "nope".into(), ..ok }).is_err());
    }

    #[test]
    fn ttl_bounds() {
        assert!(validate_ttl(MIN_HOLD_TTL_MS).is_ok());
        assert!(validate_ttl(MIN_HOLD_TTL_MS - 1).is_err());
        assert!(validate_ttl(MAX_HOLD_TTL_MS + 1).is_err());
    }
}
