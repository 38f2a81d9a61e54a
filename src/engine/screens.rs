//! Published screen layouts and the showtimes that run on them.

use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::layout::{LayoutDraft, ScreenConfig, SeatMap};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, ShowtimeSeats, validate_id};

impl Engine {
    pub fn get_screen(&self, id: &Ulid) -> Option<SeatMap> {
        self.screens.get(id).map(|e| e.value().clone())
    }

    /// All screens, by theatre then name.
    pub fn list_screens(&self) -> Vec<SeatMap> {
        let mut screens: Vec<SeatMap> = self.screens.iter().map(|e| e.value().clone()).collect();
        screens.sort_by(|a, b| (&a.theatre_id, &a.name).cmp(&(&b.theatre_id, &b.name)));
        screens
    }

    /// Validate and publish a new screen at version 1.
    pub async fn create_screen(&self, cfg: &ScreenConfig) -> Result<SeatMap, EngineError> {
        let map = LayoutDraft::from_config(cfg)?.publish(Ulid::new(), 1)?;

        let _admin = self.admin.lock().await;
        if self.screens.len() >= MAX_SCREENS {
            return Err(EngineError::LimitExceeded("too many screens"));
        }
        self.save_screen(map).await
    }

    /// Replace a screen's layout. `cfg.version` must match the current one.
    /// Rows, seats per row and disabled seats are frozen once any showtime on
    /// the screen has seat state; names, categories and prices are not.
    pub async fn update_screen(
        &self,
        id: Ulid,
        cfg: &ScreenConfig,
    ) -> Result<SeatMap, EngineError> {
        let draft = LayoutDraft::from_config(cfg)?;

        let _admin = self.admin.lock().await;
        let current = self.get_screen(&id).ok_or(EngineError::ScreenNotFound(id))?;
        let submitted = cfg
            .version
            .ok_or_else(|| {
                EngineError::InvalidRequest("version is required when updating a screen".into())
            })?;
        if submitted != current.version {
            return Err(EngineError::StaleVersion {
                current: current.version,
                submitted,
            });
        }
        let map = draft.publish(id, current.version + 1)?;
        if !map.same_geometry(&current) && self.screen_has_seat_state(&id) {
            return Err(EngineError::LayoutLocked(id));
        }
        self.save_screen(map).await
    }

    async fn save_screen(&self, map: SeatMap) -> Result<SeatMap, EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&Event::ScreenSaved { map: map.clone() }).await?;
        self.screens.insert(map.screen_id, map.clone());
        info!(
            screen_id = %map.screen_id,
            version = map.version,
            seats = map.total_seats(),
            "screen saved"
        );
        Ok(map)
    }

    /// Remove a screen that no showtime is scheduled on.
    pub async fn delete_screen(&self, id: Ulid) -> Result<(), EngineError> {
        let _admin = self.admin.lock().await;
        if !self.screens.contains_key(&id) {
            return Err(EngineError::ScreenNotFound(id));
        }
        if self.schedule.iter().any(|e| *e.value() == id) {
            return Err(EngineError::ScreenInUse(id));
        }
        let _gate = self.commit_gate.read().await;
        self.wal_append(&Event::ScreenDeleted { id }).await?;
        self.screens.remove(&id);
        info!(screen_id = %id, "screen deleted");
        Ok(())
    }

    fn screen_has_seat_state(&self, screen_id: &Ulid) -> bool {
        self.showtimes.iter().any(|e| e.value().screen_id == *screen_id)
    }

    pub fn scheduled_screen(&self, showtime_id: &str) -> Option<Ulid> {
        self.schedule.get(showtime_id).map(|e| *e.value())
    }

    /// Bind a showtime to the screen it runs on. Repeating the same binding
    /// is a no-op; moving a showtime to another screen is rejected.
    pub async fn schedule_showtime(
        &self,
        showtime_id: &str,
        screen_id: Ulid,
    ) -> Result<(), EngineError> {
        validate_id("showtimeId", showtime_id)?;

        let _admin = self.admin.lock().await;
        if !self.screens.contains_key(&screen_id) {
            return Err(EngineError::ScreenNotFound(screen_id));
        }
        match self.scheduled_screen(showtime_id) {
            Some(existing) if existing == screen_id => return Ok(()),
            Some(existing) => {
                return Err(EngineError::AlreadyExists(format!(
                    "showtime {showtime_id} is scheduled on screen {existing}"
                )));
            }
            None => {}
        }
        if self.schedule.len() >= MAX_SHOWTIMES {
            return Err(EngineError::LimitExceeded("too many showtimes"));
        }

        let _gate = self.commit_gate.read().await;
        let event = Event::ShowtimeScheduled {
            showtime_id: showtime_id.to_string(),
            screen_id,
        };
        self.wal_append(&event).await?;
        self.schedule.insert(showtime_id.to_string(), screen_id);
        info!(showtime_id, %screen_id, "showtime scheduled");
        Ok(())
    }

    /// Create the showtime's seat state from its screen's current layout:
    /// every seat available, disabled seats disabled. Idempotent; existing
    /// state is returned untouched.
    pub async fn initialize_showtime(
        &self,
        showtime_id: &str,
    ) -> Result<Arc<ShowtimeSeats>, EngineError> {
        if let Some(existing) = self.showtime(showtime_id) {
            return Ok(existing);
        }
        validate_id("showtimeId", showtime_id)?;

        let _admin = self.admin.lock().await;
        if let Some(existing) = self.showtime(showtime_id) {
            return Ok(existing);
        }
        let screen_id = self
            .scheduled_screen(showtime_id)
            .ok_or_else(|| EngineError::ShowtimeNotFound(showtime_id.to_string()))?;
        let map = self.get_screen(&screen_id).ok_or(EngineError::ScreenNotFound(screen_id))?;
        let seats = ShowtimeSeats::from_map(showtime_id, &map);

        let _gate = self.commit_gate.read().await;
        let event = Event::ShowtimeInitialized {
            showtime_id: showtime_id.to_string(),
            screen_id,
            seats: seats.read_all().await,
        };
        self.wal_append(&event).await?;
        let seats = Arc::new(seats);
        self.showtimes.insert(showtime_id.to_string(), seats.clone());
        metrics::gauge!(observability::SHOWTIMES_ACTIVE).set(self.showtimes.len() as f64);
        info!(showtime_id, %screen_id, seats = seats.len(), "showtime initialized");
        Ok(seats)
    }
}
