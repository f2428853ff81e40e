//! Events published by a running population.
//!
//! A run emits two kinds of events: a structural [`MapEvent`] carrying the
//! population grid, and a scalar [`UpdateEvent`] carrying statistics for one
//! simulation update. Both are values and never change after emission.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Which per-organism quantity a map's cells encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum MapMode {
    /// Relative fitness.
    #[default]
    Fitness,
    /// Gestation time.
    Gestation,
    /// Age in updates.
    Age,
    /// Genotype lineage.
    Genotype,
}

/// Population grid at one update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MapEvent {
    /// Update at which the grid was sampled.
    pub update: u64,
    /// Grid width in cells.
    pub width: u32,
    /// Grid height in cells.
    pub height: u32,
    /// Quantity encoded by `cells`.
    pub mode: MapMode,
    /// Row-major cells: `None` for an empty cell, otherwise a colour bucket.
    pub cells: Vec<Option<u32>>,
}

impl MapEvent {
    /// Cell at `(x, y)`, or `None` when out of bounds.
    ///
    /// The outer option is the bounds check; the inner one is occupancy.
    pub fn cell(&self, x: u32, y: u32) -> Option<Option<u32>> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = u64::from(y)
            .checked_mul(u64::from(self.width))?
            .checked_add(u64::from(x))?;
        self.cells.get(usize::try_from(index).ok()?).copied()
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }
}

/// Scalar statistics for one simulation update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct UpdateEvent {
    /// Update number.
    pub update: u64,
    /// Living organisms.
    pub organisms: u32,
    /// Mean fitness across living organisms.
    pub average_fitness: f64,
    /// Mean gestation time across living organisms.
    pub average_gestation: f64,
    /// Mean generation across living organisms.
    pub average_generation: f64,
}

/// An event emitted by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "kind", content = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// Structural population snapshot.
    Map(MapEvent),
    /// Scalar statistics for one update.
    Update(UpdateEvent),
}

impl RunEvent {
    /// Update number the event belongs to.
    pub const fn update(&self) -> u64 {
        match self {
            Self::Map(map) => map.update,
            Self::Update(update) => update.update,
        }
    }

    /// Whether this is a [`MapEvent`].
    pub const fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }
}

impl From<MapEvent> for RunEvent {
    fn from(map: MapEvent) -> Self {
        Self::Map(map)
    }
}

impl From<UpdateEvent> for RunEvent {
    fn from(update: UpdateEvent) -> Self {
        Self::Update(update)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn grid() -> MapEvent {
        MapEvent {
            update: 3,
            width: 2,
            height: 2,
            mode: MapMode::Fitness,
            cells: vec![Some(1), None, None, Some(4)],
        }
    }

    #[test]
    fn cell_lookup_is_row_major() {
        let map = grid();
        assert_eq!(map.cell(0, 0), Some(Some(1)));
        assert_eq!(map.cell(1, 0), Some(None));
        assert_eq!(map.cell(1, 1), Some(Some(4)));
        assert_eq!(map.cell(2, 0), None);
        assert_eq!(map.occupied(), 2);
    }

    #[test]
    fn run_event_is_adjacently_tagged() {
        let event = RunEvent::from(grid());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "map");
        assert_eq!(json["event"]["update"], 3);
        assert_eq!(event.update(), 3);
        assert!(event.is_map());
    }
}
