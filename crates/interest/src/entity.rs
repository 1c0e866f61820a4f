use glam::Vec2;
use sightline_common::{CellCoord, DriveMode, EventBatch};

use crate::cell::CellIdx;

/// Per-entity tracking record.
///
/// The transient view buffers (`view_snapshot`, `added_cells`,
/// `removed_cells`) are valid only between the transition that filled them
/// and the next personal-delta flush, which clears them unconditionally.
/// They are recorded for client-driven entities only; nothing observes a
/// server-driven entity, so no view is ever computed for it.
pub(crate) struct Tracked {
    pub pos: Vec2,
    pub drive: DriveMode,
    /// Cell derived from the latest position. `None` only before first
    /// placement.
    pub cell: Option<CellCoord>,
    /// Cell before the latest cross-cell transition. `None` until the
    /// first one.
    pub prev_cell: Option<CellCoord>,
    /// Full neighborhood captured at first placement, consumed whole by
    /// the next flush.
    pub view_snapshot: Option<[CellIdx; 9]>,
    /// Cells that came into view on the latest cross-cell move.
    pub added_cells: Vec<CellIdx>,
    /// Cells that dropped out of view on the latest cross-cell move.
    pub removed_cells: Vec<CellIdx>,
    pub personal_batch: EventBatch,
}

impl Tracked {
    pub fn new(pos: Vec2, drive: DriveMode) -> Self {
        Self {
            pos,
            drive,
            cell: None,
            prev_cell: None,
            view_snapshot: None,
            added_cells: Vec::new(),
            removed_cells: Vec::new(),
            personal_batch: EventBatch::new(),
        }
    }

    /// Capture the full-neighborhood snapshot taken at first placement.
    pub fn record_snapshot(&mut self, ring: [CellIdx; 9]) {
        if self.drive.is_client() {
            self.view_snapshot = Some(ring);
        }
    }

    pub fn note_added(&mut self, idx: CellIdx) {
        if self.drive.is_client() {
            self.added_cells.push(idx);
        }
    }

    pub fn note_removed(&mut self, idx: CellIdx) {
        if self.drive.is_client() {
            self.removed_cells.push(idx);
        }
    }
}
