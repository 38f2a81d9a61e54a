mod availability;
mod error;
mod holds;
mod screens;
mod sessions;
mod store;

pub use availability::{SeatSnapshot, SeatView};
pub use error::{Conflict, ConflictReason, EngineError};
pub use sessions::{LAPSED_RETENTION_MS, SessionIndex};
pub use store::{Expected, SeatBatch, ShowtimeSeats};

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::layout::SeatMap;
use crate::limits::*;
use crate::model::*;
use crate::notify::{NotifyHub, SeatChange};
use crate::observability;
use crate::wal::{Replay, Wal};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Every append that is already queued when the first one
/// arrives joins the same group and shares a single fsync. Control commands
/// run after the group they interrupted is durable.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut group: Vec<PendingAppend> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let control = match cmd {
            WalCommand::Append { event, response } => {
                group.push((event, response));
                let mut control = None;
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => group.push((event, response)),
                        other => {
                            control = Some(other);
                            break;
                        }
                    }
                }
                commit_group(&mut wal, &mut group);
                control
            }
            other => Some(other),
        };
        if let Some(cmd) = control {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_group(wal: &mut Wal, group: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(group.len() as f64);
    let started = std::time::Instant::now();
    let appended = group.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush regardless so a failed group's bytes don't ride along with the next one.
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        error!(error = %e, records = group.len(), "WAL group commit failed");
    }
    for (_, tx) in group.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut group = vec![(event, response)];
            commit_group(wal, &mut group);
        }
    }
}

// ── Replay ───────────────────────────────────────────────

/// State rebuilt from the log before anything is shared.
#[derive(Default)]
struct Recovered {
    screens: HashMap<Ulid, SeatMap>,
    schedule: HashMap<String, Ulid>,
    showtimes: HashMap<String, ShowtimeSeats>,
    bookings: HashMap<Ulid, Booking>,
}

impl Recovered {
    fn apply(&mut self, event: Event, sessions: &SessionIndex) {
        match event {
            Event::ScreenSaved { map } => {
                self.screens.insert(map.screen_id, map);
            }
            Event::ScreenDeleted { id } => {
                self.screens.remove(&id);
            }
            Event::ShowtimeScheduled { showtime_id, screen_id } => {
                self.schedule.insert(showtime_id, screen_id);
            }
            Event::ShowtimeInitialized {
                showtime_id,
                screen_id,
                seats,
            } => {
                if self.showtimes.contains_key(&showtime_id) {
                    return;
                }
                // A compacted log initializes showtimes with their live holds.
                for (seat, state) in &seats {
                    if let SeatState::Held { expires_at, .. } = state {
                        let available = SeatState::Available;
                        sessions.record(&showtime_id, seat, &available, state, *expires_at);
                    }
                }
                let seats = ShowtimeSeats::from_states(showtime_id.clone(), screen_id, seats);
                self.showtimes.insert(showtime_id, seats);
            }
            Event::SeatsChanged {
                showtime_id,
                changes,
                booking,
                at,
            } => {
                if let Some(showtime) = self.showtimes.get_mut(&showtime_id) {
                    for (seat, next) in changes {
                        if let Some(slot) = showtime.slot_mut(&seat) {
                            sessions.record(&showtime_id, &seat, slot, &next, at);
                            *slot = next;
                        }
                    }
                }
                if let Some(b) = booking {
                    self.bookings.insert(b.id, b);
                }
            }
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// Seat inventory for every showtime, plus the screen layouts they are
/// built from.
///
/// Every mutation is written to the WAL before it becomes visible. Seat
/// mutations hold `commit_gate` for reading across lock-WAL-apply, and
/// compaction takes it for writing, so a compacted log never misses a commit.
pub struct Engine {
    showtimes: DashMap<String, Arc<ShowtimeSeats>>,
    /// Showtime id → screen it runs on.
    schedule: DashMap<String, Ulid>,
    screens: DashMap<Ulid, SeatMap>,
    bookings: DashMap<Ulid, Booking>,
    sessions: SessionIndex,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    commit_gate: RwLock<()>,
    /// Serializes screen edits, scheduling and showtime initialization.
    admin: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let Replay {
            events,
            discarded_tail,
            valid_len,
        } = Wal::replay(&wal_path)?;
        if discarded_tail {
            warn!(path = %wal_path.display(), valid_len, "discarding damaged WAL tail");
            Wal::truncate(&wal_path, valid_len)?;
        }
        let replayed = events.len();
        let sessions = SessionIndex::new();
        let mut recovered = Recovered::default();
        for event in events {
            recovered.apply(event, &sessions);
        }

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            showtimes: recovered
                .showtimes
                .into_iter()
                .map(|(id, seats)| (id, Arc::new(seats)))
                .collect(),
            schedule: recovered.schedule.into_iter().collect(),
            screens: recovered.screens.into_iter().collect(),
            bookings: recovered.bookings.into_iter().collect(),
            sessions,
            wal_tx,
            notify,
            commit_gate: RwLock::new(()),
            admin: Mutex::new(()),
        };
        metrics::gauge!(observability::SHOWTIMES_ACTIVE).set(engine.showtimes.len() as f64);
        info!(
            events = replayed,
            screens = engine.screens.len(),
            showtimes = engine.showtimes.len(),
            bookings = engine.bookings.len(),
            "engine recovered from WAL"
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append the staged seat changes (and booking) as one record, then
    /// publish them and notify watchers. On WAL failure nothing becomes
    /// visible. The seat locks are held until the booking and the
    /// notification are out. Caller holds `commit_gate` for reading.
    async fn commit_seats(
        &self,
        showtime: &ShowtimeSeats,
        mut batch: SeatBatch<'_>,
        booking: Option<Booking>,
    ) -> Result<Vec<(SeatId, SeatState)>, EngineError> {
        if batch.is_empty() && booking.is_none() {
            return Ok(Vec::new());
        }
        let at = batch.now();
        let event = Event::SeatsChanged {
            showtime_id: showtime.showtime_id.clone(),
            changes: batch.staged().to_vec(),
            booking: booking.clone(),
            at,
        };
        self.wal_append(&event).await?;

        let changes = batch.apply(&self.sessions, &showtime.showtime_id);
        if let Some(b) = booking {
            self.bookings.insert(b.id, b);
        }
        if !changes.is_empty() {
            self.notify.send(SeatChange {
                showtime_id: showtime.showtime_id.clone(),
                changes: changes.clone(),
                at,
            });
        }
        drop(batch);
        Ok(changes)
    }

    fn showtime(&self, showtime_id: &str) -> Option<Arc<ShowtimeSeats>> {
        self.showtimes.get(showtime_id).map(|e| e.value().clone())
    }

    pub fn is_initialized(&self, showtime_id: &str) -> bool {
        self.showtimes.contains_key(showtime_id)
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// The caller's live hold on a showtime, if any.
    pub fn hold_session(&self, showtime_id: &str, token: &str) -> Option<HoldSession> {
        self.sessions.get(showtime_id, token)
    }

    pub fn showtime_count(&self) -> usize {
        self.showtimes.len()
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events: Vec<Event> = self
            .screens
            .iter()
            .map(|e| Event::ScreenSaved { map: e.value().clone() })
            .collect();
        events.extend(self.schedule.iter().map(|e| Event::ShowtimeScheduled {
            showtime_id: e.key().clone(),
            screen_id: *e.value(),
        }));

        let showtimes: Vec<Arc<ShowtimeSeats>> =
            self.showtimes.iter().map(|e| e.value().clone()).collect();
        for showtime in showtimes {
            events.push(Event::ShowtimeInitialized {
                showtime_id: showtime.showtime_id.clone(),
                screen_id: showtime.screen_id,
                seats: showtime.read_all().await,
            });
        }

        events.extend(self.bookings.iter().map(|e| {
            let b = e.value().clone();
            Event::SeatsChanged {
                showtime_id: b.showtime_id.clone(),
                changes: Vec::new(),
                at: b.created_at,
                booking: Some(b),
            }
        }));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

// ── Request validation shared by the operation modules ────

fn validate_token(token: &str) -> Result<(), EngineError> {
    if token.is_empty() {
        return Err(EngineError::InvalidRequest("sessionId is required".into()));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(EngineError::LimitExceeded("sessionId too long"));
    }
    if token.chars().any(char::is_control) {
        return Err(EngineError::InvalidRequest("sessionId contains control characters".into()));
    }
    Ok(())
}

fn validate_id(what: &str, id: &str) -> Result<(), EngineError> {
    if id.is_empty() {
        return Err(EngineError::InvalidRequest(format!("{what} is required")));
    }
    if id.len() > MAX_ID_LEN || id.chars().any(char::is_control) {
        return Err(EngineError::InvalidRequest(format!("{what} is malformed")));
    }
    Ok(())
}

/// Deduplicated, ordered seat set for one request.
fn seat_set(seat_ids: &[SeatId]) -> Result<BTreeSet<SeatId>, EngineError> {
    if seat_ids.is_empty() {
        return Err(EngineError::InvalidRequest("at least one seat is required".into()));
    }
    if seat_ids.len() > MAX_SEATS_PER_REQUEST {
        return Err(EngineError::LimitExceeded("too many seats in one request"));
    }
    Ok(seat_ids.iter().cloned().collect())
}
