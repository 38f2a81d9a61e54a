//! Screen layout editing: rows × seats grid, price categories, disabled seats.
//!
//! A [`LayoutDraft`] is the mutable editing surface. Publishing validates it and
//! yields an immutable [`SeatMap`], which is what showtimes are initialized from.
//! Nothing here touches live seat state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::SeatId;

pub const DEFAULT_CATEGORY_NAME: &str = "New Category";
pub const DEFAULT_CATEGORY_PRICE: f64 = 100.0;
pub const DEFAULT_CATEGORY_COLOR: &str = "#3B82F6";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub color: String,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LayoutError {
    #[error("invalid layout: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("unknown seat: {0}")]
    UnknownSeat(String),

    #[error("unknown row: {0}")]
    UnknownRow(char),

    #[error("At least one category is required")]
    LastCategory,

    #[error("From row must be less than or equal to To row ({from} > {to})")]
    InvalidRowRange { from: char, to: char },

    #[error("seats already carry category assignments; confirm to regenerate the grid")]
    ConfirmationRequired,

    #[error("too many categories (max {MAX_CATEGORIES})")]
    TooManyCategories,
}

/// Row label for a 0-based row index: 0 → 'A', 25 → 'Z'.
pub fn row_label(index: u8) -> char {
    (b'A' + index.min(MAX_ROWS - 1)) as char
}

fn row_index(label: char) -> Option<u8> {
    label
        .is_ascii_uppercase()
        .then(|| label as u8 - b'A')
}

/// Published, immutable layout of one screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatMap {
    pub screen_id: Ulid,
    pub name: String,
    pub theatre_id: String,
    /// Bumped on every accepted save.
    pub version: u64,
    pub rows: u8,
    pub seats_per_row: u8,
    pub categories: Vec<Category>,
    /// Every active seat has an entry; disabled seats may not.
    pub assignments: BTreeMap<SeatId, String>,
    pub disabled: BTreeSet<SeatId>,
}

impl SeatMap {
    /// Seat ids in grid order (A1, A2, …, B1, …).
    pub fn seat_ids(&self) -> impl Iterator<Item = SeatId> + '_ {
        (0..self.rows).flat_map(move |r| {
            (1..=self.seats_per_row).map(move |c| SeatId::new(row_label(r), c))
        })
    }

    pub fn contains(&self, seat: &SeatId) -> bool {
        row_index(seat.row()).is_some_and(|r| r < self.rows)
            && (1..=self.seats_per_row).contains(&seat.column())
            && seat.as_str().parse::<SeatId>().is_ok()
    }

    pub fn is_disabled(&self, seat: &SeatId) -> bool {
        self.disabled.contains(seat)
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn category_of(&self, seat: &SeatId) -> Option<&Category> {
        self.assignments.get(seat).and_then(|id| self.category(id))
    }

    /// Price of a seat, 0 when it has no category.
    pub fn price_of(&self, seat: &SeatId) -> f64 {
        self.category_of(seat).map_or(0.0, |c| c.price)
    }

    /// Seats that can be sold.
    pub fn total_seats(&self) -> usize {
        self.rows as usize * self.seats_per_row as usize - self.disabled.len()
    }

    /// Same seat identities and same disabled set. Only such edits are allowed
    /// once a showtime has materialized seat state from this map.
    pub fn same_geometry(&self, other: &SeatMap) -> bool {
        self.rows == other.rows
            && self.seats_per_row == other.seats_per_row
            && self.disabled == other.disabled
    }

    pub fn to_config(&self) -> ScreenConfig {
        ScreenConfig {
            name: self.name.clone(),
            theatre_id: self.theatre_id.clone(),
            rows: self.rows as u32,
            seats_per_row: self.seats_per_row as u32,
            categories: self.categories.clone(),
            seat_map: self
                .seat_ids()
                .map(|seat_id| SeatConfig {
                    category_id: self.assignments.get(&seat_id).cloned(),
                    status: if self.is_disabled(&seat_id) {
                        SeatConfigStatus::Disabled
                    } else {
                        SeatConfigStatus::Available
                    },
                    seat_id: seat_id.to_string(),
                })
                .collect(),
            version: Some(self.version),
        }
    }
}

// ── Wire shape of a screen configuration ─────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenConfig {
    pub name: String,
    pub theatre_id: String,
    pub rows: u32,
    pub seats_per_row: u32,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub seat_map: Vec<SeatConfig>,
    /// Version the editor loaded; required when updating an existing screen.
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatConfig {
    pub seat_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub status: SeatConfigStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatConfigStatus {
    #[default]
    Available,
    Disabled,
    /// Editor-only states ("booked", "selected") carry no layout meaning.
    #[serde(other)]
    Other,
}

// ── Draft ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DraftSeat {
    pub seat_id: SeatId,
    pub row: u8,
    pub col: u8,
    pub category_id: Option<String>,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCategory {
    pub name: String,
    pub price: f64,
    pub color: String,
}

impl Default for NewCategory {
    fn default() -> Self {
        Self {
            name: DEFAULT_CATEGORY_NAME.into(),
            price: DEFAULT_CATEGORY_PRICE,
            color: DEFAULT_CATEGORY_COLOR.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryUpdate {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutDraft {
    pub name: String,
    pub theatre_id: String,
    rows: u32,
    seats_per_row: u32,
    categories: Vec<Category>,
    seats: Vec<DraftSeat>,
}

fn rows_in_range(rows: u32) -> bool {
    (MIN_ROWS as u32..=MAX_ROWS as u32).contains(&rows)
}

fn seats_in_range(seats: u32) -> bool {
    (MIN_SEATS_PER_ROW as u32..=MAX_SEATS_PER_ROW as u32).contains(&seats)
}

fn build_grid(rows: u8, seats_per_row: u8) -> Vec<DraftSeat> {
    let mut seats = Vec::with_capacity(rows as usize * seats_per_row as usize);
    for row in 0..rows {
        for col in 0..seats_per_row {
            seats.push(DraftSeat {
                seat_id: SeatId::new(row_label(row), col + 1),
                row,
                col,
                category_id: None,
                disabled: false,
            });
        }
    }
    seats
}

impl LayoutDraft {
    pub fn new(name: impl Into<String>, theatre_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            theatre_id: theatre_id.into(),
            rows: 0,
            seats_per_row: 0,
            categories: Vec::new(),
            seats: Vec::new(),
        }
    }

    /// Reopen a published map for editing.
    pub fn from_map(map: &SeatMap) -> Self {
        let mut seats = build_grid(map.rows, map.seats_per_row);
        for seat in &mut seats {
            seat.category_id = map.assignments.get(&seat.seat_id).cloned();
            seat.disabled = map.is_disabled(&seat.seat_id);
        }
        Self {
            name: map.name.clone(),
            theatre_id: map.theatre_id.clone(),
            rows: map.rows as u32,
            seats_per_row: map.seats_per_row as u32,
            categories: map.categories.clone(),
            seats,
        }
    }

    /// Build a draft from a submitted configuration. An empty `seat_map`
    /// expands to the full grid with every seat in the first category.
    pub fn from_config(cfg: &ScreenConfig) -> Result<Self, LayoutError> {
        let mut draft = Self::new(cfg.name.clone(), cfg.theatre_id.clone());
        draft.rows = cfg.rows;
        draft.seats_per_row = cfg.seats_per_row;
        draft.categories = cfg.categories.clone();

        let mut problems = Vec::new();
        if rows_in_range(cfg.rows) && seats_in_range(cfg.seats_per_row) {
            draft.seats = build_grid(cfg.rows as u8, cfg.seats_per_row as u8);
            if cfg.seat_map.is_empty() {
                if let Some(first) = draft.categories.first().map(|c| c.id.clone()) {
                    for seat in &mut draft.seats {
                        seat.category_id = Some(first.clone());
                    }
                }
            }
            for entry in &cfg.seat_map {
                let Some(seat) = draft
                    .seats
                    .iter_mut()
                    .find(|s| s.seat_id.as_str() == entry.seat_id)
                else {
                    problems.push(format!("Unknown seat {}", entry.seat_id));
                    continue;
                };
                if let Some(cat) = &entry.category_id
                    && !cfg.categories.iter().any(|c| &c.id == cat)
                {
                    problems.push(format!(
                        "Seat {} references unknown category {cat}",
                        entry.seat_id
                    ));
                    continue;
                }
                seat.category_id = entry.category_id.clone();
                seat.disabled = entry.status == SeatConfigStatus::Disabled;
            }
        }

        if problems.is_empty() {
            Ok(draft)
        } else {
            let mut all = draft.validate();
            all.extend(problems);
            Err(LayoutError::Invalid(all))
        }
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn seats_per_row(&self) -> u32 {
        self.seats_per_row
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn seats(&self) -> &[DraftSeat] {
        &self.seats
    }

    pub fn seat(&self, seat_id: &SeatId) -> Option<&DraftSeat> {
        self.seats.iter().find(|s| &s.seat_id == seat_id)
    }

    fn seat_mut(&mut self, seat_id: &SeatId) -> Result<&mut DraftSeat, LayoutError> {
        self.seats
            .iter_mut()
            .find(|s| &s.seat_id == seat_id)
            .ok_or_else(|| LayoutError::UnknownSeat(seat_id.to_string()))
    }

    fn has_category(&self, id: &str) -> bool {
        self.categories.iter().any(|c| c.id == id)
    }

    /// Regenerate the grid with every seat unassigned. Refuses to discard
    /// existing assignments or disabled seats unless `confirm` is set.
    pub fn generate_grid(
        &mut self,
        rows: u8,
        seats_per_row: u8,
        confirm: bool,
    ) -> Result<&[DraftSeat], LayoutError> {
        let mut problems = Vec::new();
        if !rows_in_range(rows as u32) {
            problems.push(format!("Rows must be between {MIN_ROWS} and {MAX_ROWS}"));
        }
        if !seats_in_range(seats_per_row as u32) {
            problems.push(format!(
                "Seats per row must be between {MIN_SEATS_PER_ROW} and {MAX_SEATS_PER_ROW}"
            ));
        }
        if !problems.is_empty() {
            return Err(LayoutError::Invalid(problems));
        }
        let customized = self.seats.iter().any(|s| s.category_id.is_some() || s.disabled);
        if customized && !confirm {
            return Err(LayoutError::ConfirmationRequired);
        }
        self.rows = rows as u32;
        self.seats_per_row = seats_per_row as u32;
        self.seats = build_grid(rows, seats_per_row);
        Ok(&self.seats)
    }

    /// Assign a category to every active seat in rows `from..=to`.
    /// Disabled seats are skipped. Returns the number of seats assigned.
    pub fn assign_category_to_range(
        &mut self,
        from: char,
        to: char,
        category_id: &str,
    ) -> Result<usize, LayoutError> {
        if !self.has_category(category_id) {
            return Err(LayoutError::UnknownCategory(category_id.to_string()));
        }
        let from_idx = self.row_of(from)?;
        let to_idx = self.row_of(to)?;
        if from_idx > to_idx {
            return Err(LayoutError::InvalidRowRange { from, to });
        }
        let mut assigned = 0;
        for seat in self
            .seats
            .iter_mut()
            .filter(|s| !s.disabled && (from_idx..=to_idx).contains(&s.row))
        {
            seat.category_id = Some(category_id.to_string());
            assigned += 1;
        }
        Ok(assigned)
    }

    fn row_of(&self, label: char) -> Result<u8, LayoutError> {
        row_index(label)
            .filter(|r| (*r as u32) < self.rows)
            .ok_or(LayoutError::UnknownRow(label))
    }

    /// Assign (or clear) one seat's category. Returns false for disabled seats,
    /// which keep whatever they had.
    pub fn assign_category(
        &mut self,
        seat_id: &SeatId,
        category_id: Option<&str>,
    ) -> Result<bool, LayoutError> {
        if let Some(cat) = category_id
            && !self.has_category(cat)
        {
            return Err(LayoutError::UnknownCategory(cat.to_string()));
        }
        let seat = self.seat_mut(seat_id)?;
        if seat.disabled {
            return Ok(false);
        }
        seat.category_id = category_id.map(str::to_string);
        Ok(true)
    }

    /// Flip a seat between active and disabled. Returns the new disabled flag.
    pub fn toggle_seat_disabled(&mut self, seat_id: &SeatId) -> Result<bool, LayoutError> {
        let seat = self.seat_mut(seat_id)?;
        seat.disabled = !seat.disabled;
        Ok(seat.disabled)
    }

    pub fn add_category(&mut self, new: NewCategory) -> Result<String, LayoutError> {
        if self.categories.len() >= MAX_CATEGORIES {
            return Err(LayoutError::TooManyCategories);
        }
        let mut n = self.categories.len() + 1;
        let id = loop {
            let candidate = format!("c{n}");
            if !self.has_category(&candidate) {
                break candidate;
            }
            n += 1;
        };
        self.categories.push(Category {
            id: id.clone(),
            name: new.name,
            price: new.price,
            color: new.color,
        });
        Ok(id)
    }

    pub fn update_category(&mut self, id: &str, update: CategoryUpdate) -> Result<(), LayoutError> {
        let cat = self
            .categories
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| LayoutError::UnknownCategory(id.to_string()))?;
        if let Some(name) = update.name {
            cat.name = name;
        }
        if let Some(price) = update.price {
            cat.price = price;
        }
        if let Some(color) = update.color {
            cat.color = color;
        }
        Ok(())
    }

    /// Remove a category and unassign its seats. Returns how many seats lost
    /// their category. The last remaining category cannot be deleted.
    pub fn delete_category(&mut self, id: &str) -> Result<usize, LayoutError> {
        if !self.has_category(id) {
            return Err(LayoutError::UnknownCategory(id.to_string()));
        }
        if self.categories.len() == 1 {
            return Err(LayoutError::LastCategory);
        }
        self.categories.retain(|c| c.id != id);
        let mut unassigned = 0;
        for seat in self.seats.iter_mut().filter(|s| s.category_id.as_deref() == Some(id)) {
            seat.category_id = None;
            unassigned += 1;
        }
        Ok(unassigned)
    }

    /// Active (non-disabled) seat count.
    pub fn total_seats(&self) -> usize {
        self.seats.iter().filter(|s| !s.disabled).count()
    }

    pub fn seat_price(&self, seat_id: &SeatId) -> f64 {
        self.seat(seat_id)
            .and_then(|s| s.category_id.as_deref())
            .and_then(|id| self.categories.iter().find(|c| c.id == id))
            .map_or(0.0, |c| c.price)
    }

    pub fn row_seats(&self, row: u8) -> Vec<&DraftSeat> {
        self.seats.iter().filter(|s| s.row == row).collect()
    }

    /// Every problem that blocks publishing; empty when the draft is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.theatre_id.trim().is_empty() {
            errors.push("Please select a theatre".to_string());
        } else if self.theatre_id.len() > MAX_NAME_LEN {
            errors.push(format!("Theatre id must be at most {MAX_NAME_LEN} characters"));
        }
        if self.name.trim().is_empty() {
            errors.push("Screen name is required".to_string());
        } else if self.name.len() > MAX_NAME_LEN {
            errors.push(format!("Screen name must be at most {MAX_NAME_LEN} characters"));
        }
        if !rows_in_range(self.rows) {
            errors.push(format!("Rows must be between {MIN_ROWS} and {MAX_ROWS}"));
        }
        if !seats_in_range(self.seats_per_row) {
            errors.push(format!(
                "Seats per row must be between {MIN_SEATS_PER_ROW} and {MAX_SEATS_PER_ROW}"
            ));
        }
        if self.categories.is_empty() {
            errors.push("At least one category is required".to_string());
        } else if self.categories.len() > MAX_CATEGORIES {
            errors.push(format!("At most {MAX_CATEGORIES} categories are allowed"));
        }
        if self.categories.iter().any(|c| !(c.price.is_finite() && c.price > 0.0)) {
            errors.push("All category prices must be greater than 0".to_string());
        }
        if self.categories.iter().any(|c| c.name.trim().is_empty()) {
            errors.push("Category name is required".to_string());
        }
        if self.categories.iter().any(|c| c.name.len() > MAX_NAME_LEN) {
            errors.push(format!("Category names must be at most {MAX_NAME_LEN} characters"));
        }
        if self.categories.iter().any(|c| c.color.len() > MAX_NAME_LEN) {
            errors.push(format!("Category colors must be at most {MAX_NAME_LEN} characters"));
        }
        if self.categories.iter().any(|c| c.id.is_empty() || c.id.len() > MAX_ID_LEN) {
            errors.push("Category ids must be 1 to 64 characters".to_string());
        }
        let distinct: BTreeSet<&str> = self.categories.iter().map(|c| c.id.as_str()).collect();
        if distinct.len() != self.categories.len() {
            errors.push("Category ids must be unique".to_string());
        }
        let grid_ok = rows_in_range(self.rows) && seats_in_range(self.seats_per_row);
        if grid_ok {
            let unassigned = self
                .seats
                .iter()
                .filter(|s| !s.disabled && s.category_id.is_none())
                .count();
            if unassigned > 0 {
                errors.push(format!("{unassigned} seats have no category"));
            }
        }
        errors
    }

    /// Validate and freeze into a [`SeatMap`].
    pub fn publish(&self, screen_id: Ulid, version: u64) -> Result<SeatMap, LayoutError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(LayoutError::Invalid(errors));
        }
        let mut assignments = BTreeMap::new();
        let mut disabled = BTreeSet::new();
        for seat in &self.seats {
            if let Some(cat) = &seat.category_id {
                assignments.insert(seat.seat_id.clone(), cat.clone());
            }
            if seat.disabled {
                disabled.insert(seat.seat_id.clone());
            }
        }
        Ok(SeatMap {
            screen_id,
            name: self.name.trim().to_string(),
            theatre_id: self.theatre_id.clone(),
            version,
            rows: self.rows as u8,
            seats_per_row: self.seats_per_row as u8,
            categories: self.categories.clone(),
            assignments,
            disabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn premium() -> NewCategory {
        NewCategory {
            name: "Premium".into(),
            price: 250.0,
            color: "#8B5CF6".into(),
        }
    }

    fn grid(rows: u8, seats: u8) -> LayoutDraft {
        let mut draft = LayoutDraft::new("Screen 1", "theatre-1");
        draft.generate_grid(rows, seats, false).unwrap();
        draft
    }

    fn seat(s: &str) -> SeatId {
        s.parse().unwrap()
    }

    #[test]
    fn generate_grid_labels_rows_and_columns() {
        let draft = grid(5, 10);
        assert_eq!(draft.seats().len(), 50);
        assert_eq!(draft.seats()[0].seat_id.as_str(), "A1");
        assert_eq!(draft.seats()[10].seat_id.as_str(), "B1");
        assert_eq!(draft.seats()[49].seat_id.as_str(), "E10");
        assert!(draft.seats().iter().all(|s| s.category_id.is_none()));
    }

    #[test]
    fn generate_grid_rejects_out_of_range() {
        let mut draft = LayoutDraft::new("Screen 1", "t");
        assert!(matches!(draft.generate_grid(0, 10, false), Err(LayoutError::Invalid(_))));
        assert!(matches!(draft.generate_grid(27, 10, false), Err(LayoutError::Invalid(_))));
        assert!(matches!(draft.generate_grid(5, 51, false), Err(LayoutError::Invalid(_))));
    }

    #[test]
    fn regenerate_requires_confirmation_once_assigned() {
        let mut draft = grid(2, 2);
        let c1 = draft.add_category(premium()).unwrap();
        draft.assign_category(&seat("A1"), Some(&c1)).unwrap();

        assert_eq!(draft.generate_grid(3, 3, false), Err(LayoutError::ConfirmationRequired));
        assert_eq!(draft.seats().len(), 4); // untouched

        draft.generate_grid(3, 3, true).unwrap();
        assert_eq!(draft.seats().len(), 9);
        assert!(draft.seats().iter().all(|s| s.category_id.is_none()));
    }

    #[test]
    fn quick_assign_row_range() {
        let mut draft = grid(5, 10);
        let vip = draft.add_category(premium()).unwrap();

        let assigned = draft.assign_category_to_range('A', 'B', &vip).unwrap();
        assert_eq!(assigned, 20);
        let vip_count = draft
            .seats()
            .iter()
            .filter(|s| s.category_id.as_deref() == Some(vip.as_str()))
            .count();
        assert_eq!(vip_count, 20);
        assert_eq!(draft.seats().iter().filter(|s| s.category_id.is_none()).count(), 30);
    }

    #[test]
    fn quick_assign_skips_disabled_seats() {
        let mut draft = grid(2, 5);
        let c1 = draft.add_category(premium()).unwrap();
        draft.toggle_seat_disabled(&seat("A3")).unwrap();

        let assigned = draft.assign_category_to_range('A', 'A', &c1).unwrap();
        assert_eq!(assigned, 4);
        assert_eq!(draft.seat(&seat("A3")).unwrap().category_id, None);
    }

    #[test]
    fn quick_assign_validates_inputs() {
        let mut draft = grid(5, 10);
        let c1 = draft.add_category(premium()).unwrap();
        assert_eq!(
            draft.assign_category_to_range('D', 'B', &c1),
            Err(LayoutError::InvalidRowRange { from: 'D', to: 'B' })
        );
        assert_eq!(
            draft.assign_category_to_range('A', 'F', &c1),
            Err(LayoutError::UnknownRow('F'))
        );
        assert!(matches!(
            draft.assign_category_to_range('A', 'B', "nope"),
            Err(LayoutError::UnknownCategory(_))
        ));
    }

    #[test]
    fn delete_category_unassigns_only_its_seats() {
        let mut draft = grid(2, 5);
        let c1 = draft.add_category(premium()).unwrap();
        let c2 = draft.add_category(NewCategory::default()).unwrap();
        draft.assign_category_to_range('A', 'A', &c1).unwrap();
        draft.assign_category_to_range('B', 'B', &c2).unwrap();

        let unassigned = draft.delete_category(&c1).unwrap();
        assert_eq!(unassigned, 5);
        assert!(draft.row_seats(0).iter().all(|s| s.category_id.is_none()));
        assert!(draft.row_seats(1).iter().all(|s| s.category_id.as_deref() == Some(c2.as_str())));
        assert_eq!(draft.categories().len(), 1);
    }

    #[test]
    fn delete_last_category_rejected() {
        let mut draft = grid(1, 1);
        let c1 = draft.add_category(premium()).unwrap();
        assert_eq!(draft.delete_category(&c1), Err(LayoutError::LastCategory));
        assert_eq!(draft.categories().len(), 1);
    }

    #[test]
    fn add_category_uses_defaults_and_unique_ids() {
        let mut draft = grid(1, 1);
        let a = draft.add_category(NewCategory::default()).unwrap();
        let b = draft.add_category(NewCategory::default()).unwrap();
        assert_ne!(a, b);
        assert_eq!(draft.categories()[0].name, DEFAULT_CATEGORY_NAME);
        assert_eq!(draft.categories()[0].price, DEFAULT_CATEGORY_PRICE);
    }

    #[test]
    fn update_category_changes_price_seen_by_seats() {
        let mut draft = grid(1, 2);
        let c1 = draft.add_category(premium()).unwrap();
        draft.assign_category(&seat("A1"), Some(&c1)).unwrap();
        draft
            .update_category(&c1, CategoryUpdate {
                price: Some(300.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(draft.seat_price(&seat("A1")), 300.0);
        assert_eq!(draft.seat_price(&seat("A2")), 0.0);
    }

    #[test]
    fn disabled_seat_ignores_single_assignment() {
        let mut draft = grid(1, 3);
        let c1 = draft.add_category(premium()).unwrap();
        assert!(draft.toggle_seat_disabled(&seat("A2")).unwrap());
        assert!(!draft.assign_category(&seat("A2"), Some(&c1)).unwrap());
        assert_eq!(draft.total_seats(), 2);
        assert!(!draft.toggle_seat_disabled(&seat("A2")).unwrap());
        assert_eq!(draft.total_seats(), 3);
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut draft = LayoutDraft::new("", "");
        draft.rows = 0;
        draft.seats_per_row = 100;
        let errors = draft.validate();
        assert!(errors.contains(&"Please select a theatre".to_string()));
        assert!(errors.contains(&"Screen name is required".to_string()));
        assert!(errors.contains(&"Rows must be between 1 and 26".to_string()));
        assert!(errors.contains(&"Seats per row must be between 1 and 50".to_string()));
        assert!(errors.contains(&"At least one category is required".to_string()));
    }

    #[test]
    fn validation_bounds_theatre_and_category_text() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        let mut draft = LayoutDraft::new("Screen 1", long.clone());
        draft.generate_grid(1, 2, false).unwrap();
        let c1 = draft
            .add_category(NewCategory {
                name: long.clone(),
                price: 100.0,
                color: long,
            })
            .unwrap();
        draft.assign_category_to_range('A', 'A', &c1).unwrap();

        let errors = draft.validate();
        assert_eq!(
            errors,
            vec![
                format!("Theatre id must be at most {MAX_NAME_LEN} characters"),
                format!("Category names must be at most {MAX_NAME_LEN} characters"),
                format!("Category colors must be at most {MAX_NAME_LEN} characters"),
            ]
        );

        draft.theatre_id = "x".repeat(MAX_NAME_LEN);
        draft
            .update_category(
                &c1,
                CategoryUpdate {
                    name: Some("Premium".into()),
                    price: None,
                    color: Some("#8B5CF6".into()),
                },
            )
            .unwrap();
        assert!(draft.validate().is_empty());
    }

    #[test]
    fn validation_rejects_zero_price_and_unassigned_seats() {
        let mut draft = grid(2, 2);
        let c1 = draft.add_category(NewCategory {
            price: 0.0,
            ..premium()
        })
        .unwrap();
        draft.assign_category_to_range('A', 'A', &c1).unwrap();
        let errors = draft.validate();
        assert!(errors.contains(&"All category prices must be greater than 0".to_string()));
        assert!(errors.contains(&"2 seats have no category".to_string()));
        assert!(matches!(draft.publish(Ulid::new(), 1), Err(LayoutError::Invalid(_))));
    }

    #[test]
    fn publish_freezes_assignments_and_disabled_seats() {
        let mut draft = grid(2, 3);
        let c1 = draft.add_category(premium()).unwrap();
        draft.toggle_seat_disabled(&seat("B3")).unwrap();
        draft.assign_category_to_range('A', 'B', &c1).unwrap();

        let map = draft.publish(Ulid::new(), 1).unwrap();
        assert_eq!(map.total_seats(), 5);
        assert!(map.is_disabled(&seat("B3")));
        assert_eq!(map.price_of(&seat("A1")), 250.0);
        assert_eq!(map.price_of(&seat("B3")), 0.0);
        assert_eq!(map.seat_ids().count(), 6);
        assert!(map.contains(&seat("B3")));
        assert!(!map.contains(&seat("C1")));
        assert!(!map.contains(&seat("A4")));
    }

    #[test]
    fn config_with_empty_seat_map_uses_first_category() {
        let cfg = ScreenConfig {
            name: "Screen 1".into(),
            theatre_id: "1".into(),
            rows: 10,
            seats_per_row: 10,
            categories: vec![Category {
                id: "c1".into(),
                name: "Premium".into(),
                price: 250.0,
                color: "#8B5CF6".into(),
            }],
            seat_map: vec![],
            version: None,
        };
        let map = LayoutDraft::from_config(&cfg).unwrap().publish(Ulid::new(), 1).unwrap();
        assert_eq!(map.total_seats(), 100);
        assert_eq!(map.assignments.len(), 100);
    }

    #[test]
    fn config_roundtrips_through_seat_map() {
        let mut draft = grid(3, 4);
        let c1 = draft.add_category(premium()).unwrap();
        let c2 = draft.add_category(NewCategory::default()).unwrap();
        draft.assign_category_to_range('A', 'A', &c1).unwrap();
        draft.assign_category_to_range('B', 'C', &c2).unwrap();
        draft.toggle_seat_disabled(&seat("C4")).unwrap();
        let map = draft.publish(Ulid::new(), 3).unwrap();

        let reopened = LayoutDraft::from_config(&map.to_config()).unwrap();
        assert_eq!(reopened.publish(map.screen_id, 3).unwrap(), map);
    }

    #[test]
    fn config_rejects_unknown_seats_and_categories() {
        let cfg = ScreenConfig {
            name: "Screen 1".into(),
            theatre_id: "1".into(),
            rows: 1,
            seats_per_row: 2,
            categories: vec![Category {
                id: "c1".into(),
                name: "Premium".into(),
                price: 250.0,
                color: "#8B5CF6".into(),
            }],
            seat_map: vec![
                SeatConfig {
                    seat_id: "Z9".into(),
                    category_id: Some("c1".into()),
                    status: SeatConfigStatus::Available,
                },
                SeatConfig {
                    seat_id: "A1".into(),
                    category_id: Some("c9".into()),
                    status: SeatConfigStatus::Available,
                },
            ],
            version: None,
        };
        let Err(LayoutError::Invalid(errors)) = LayoutDraft::from_config(&cfg) else {
            panic!("expected validation failure");
        };
        assert!(errors.iter().any(|e| e.contains("Z9")));
        assert!(errors.iter().any(|e| e.contains("c9")));
    }

    #[test]
    fn row_labels() {
        assert_eq!(row_label(0), 'A');
        assert_eq!(row_label(1), 'B');
        assert_eq!(row_label(25), 'Z');
    }
}
