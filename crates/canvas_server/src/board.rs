//! In-memory authoritative board cache.
//!
//! The cache holds the current color of every cell that has ever been placed
//! and answers with the background color for the rest. Writes coming from
//! committed placements are ordered by their store sequence number, so the
//! cache always converges on the last committed color of a cell no matter in
//! which order concurrent commits reach it.

use crate::types::{Color, Coordinate, Placement, PixelUpdate, Seq};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// Point-in-time copy of every explicitly colored cell.
pub type BoardSnapshot = BTreeMap<Coordinate, Color>;

#[derive(Debug, Clone)]
struct Cell {
    color: Color,
    /// Sequence of the placement that produced `color`; 0 for direct writes.
    seq: Seq,
}

/// Process-wide map from coordinate to current color.
#[derive(Debug)]
pub struct BoardCache {
    grid_size: u32,
    background: Color,
    cells: RwLock<HashMap<Coordinate, Cell>>,
}

impl BoardCache {
    /// Creates a cold cache: every cell reads as `background`.
    pub fn new(grid_size: u32, background: Color) -> Self {
        Self {
            grid_size,
            background,
            cells: RwLock::new(HashMap::new()),
        }
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Current color of `coord`, or the background color if it was never placed.
    pub async fn get(&self, coord: Coordinate) -> Color {
        self.cells
            .read()
            .await
            .get(&coord)
            .map(|cell| cell.color.clone())
            .unwrap_or_else(|| self.background.clone())
    }

    /// Overwrites a cell unconditionally, keeping its placement sequence.
    pub async fn set(&self, coord: Coordinate, color: Color) {
        let mut cells = self.cells.write().await;
        let seq = cells.get(&coord).map_or(0, |cell| cell.seq);
        cells.insert(coord, Cell { color, seq });
    }

    /// Applies a committed placement if it is newer than what the cell holds.
    ///
    /// `on_applied` runs while the write lock is held, so anything it enqueues
    /// is ordered consistently with snapshots taken through [`with_snapshot`].
    /// Returns `false` when the placement was already superseded.
    ///
    /// [`with_snapshot`]: BoardCache::with_snapshot
    pub async fn apply<F>(&self, placement: &Placement, on_applied: F) -> bool
    where
        F: FnOnce(&PixelUpdate),
    {
        let mut cells = self.cells.write().await;
        if let Some(cell) = cells.get(&placement.coordinate) {
            if cell.seq >= placement.seq {
                debug!(
                    "Placement #{} at {} superseded by #{}",
                    placement.seq, placement.coordinate, cell.seq
                );
                return false;
            }
        }
        cells.insert(
            placement.coordinate,
            Cell {
                color: placement.color.clone(),
                seq: placement.seq,
            },
        );
        on_applied(&PixelUpdate::from(placement));
        true
    }

    /// Consistent copy of the board.
    pub async fn snapshot(&self) -> BoardSnapshot {
        Self::collect(&*self.cells.read().await)
    }

    /// Runs `f` on a snapshot while the read lock is still held.
    pub async fn with_snapshot<R>(&self, f: impl FnOnce(&BoardSnapshot) -> R) -> R {
        let cells = self.cells.read().await;
        f(&Self::collect(&cells))
    }

    /// Loads placements (typically the store's latest-per-coordinate result).
    ///
    /// Only the highest sequence per cell wins, and cells already holding a
    /// newer live placement are left untouched. Returns how many cells changed.
    pub async fn seed<I>(&self, placements: I) -> usize
    where
        I: IntoIterator<Item = Placement>,
    {
        let mut cells = self.cells.write().await;
        let mut changed = 0;
        for placement in placements {
            let newer = cells
                .get(&placement.coordinate)
                .map_or(true, |cell| cell.seq < placement.seq);
            if newer {
                cells.insert(
                    placement.coordinate,
                    Cell {
                        color: placement.color,
                        seq: placement.seq,
                    },
                );
                changed += 1;
            }
        }
        changed
    }

    fn collect(cells: &HashMap<Coordinate, Cell>) -> BoardSnapshot {
        cells
            .iter()
            .map(|(coord, cell)| (*coord, cell.color.clone()))
            .collect()
    }
}
