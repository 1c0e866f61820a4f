use std::collections::BTreeSet;

use glam::Vec2;
use sightline_common::{CellCoord, DriveMode, EntityId, EventBatch};

use crate::fault::Fault;

/// Stable index of a cell in the grid's arena.
///
/// Cells are never destroyed, so an index handed out once stays valid for
/// the life of the grid. Indices replace the nullable neighbor references a
/// pointer-based design would need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CellIdx(pub(crate) usize);

/// Kind of notification op written into a cell's batch at transition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    Enter,
    Move,
    Exit,
}

/// One grid square of the sparse world partition.
///
/// `residents` is the authoritative membership. Changes are staged into
/// `staged_enter`/`staged_exit` during transition processing and applied
/// only by [`Cell::commit`], so no membership set is ever mutated while
/// another part of the tick iterates it.
///
/// Uses `BTreeSet` for deterministic iteration order across platforms.
pub struct Cell {
    coord: CellCoord,
    pub(crate) residents: BTreeSet<EntityId>,
    pub(crate) staged_enter: BTreeSet<EntityId>,
    pub(crate) staged_exit: BTreeSet<EntityId>,
    /// Self-centered 3x3 block, row-major. Computed at most once by the
    /// grid and immutable afterward.
    pub(crate) neighborhood: Option<[CellIdx; 9]>,
    /// Notification-traffic counters, adjusted by neighbor write events
    /// (not by membership). Kept as diagnostics.
    client_concern: i64,
    server_concern: i64,
    /// This tick's accumulated events, cleared every tick whether or not
    /// they were delivered.
    pub(crate) batch: EventBatch,
}

impl Cell {
    pub(crate) fn new(coord: CellCoord) -> Self {
        Self {
            coord,
            residents: BTreeSet::new(),
            staged_enter: BTreeSet::new(),
            staged_exit: BTreeSet::new(),
            neighborhood: None,
            client_concern: 0,
            server_concern: 0,
            batch: EventBatch::new(),
        }
    }

    pub fn coord(&self) -> CellCoord {
        self.coord
    }

    /// Committed membership of this cell.
    pub fn residents(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.residents.iter().copied()
    }

    pub fn resident_count(&self) -> usize {
        self.residents.len()
    }

    /// Net enter-minus-exit write events from client-driven movers.
    pub fn client_concern(&self) -> i64 {
        self.client_concern
    }

    /// Net enter-minus-exit write events from server-driven movers.
    pub fn server_concern(&self) -> i64 {
        self.server_concern
    }

    /// Stage a pending membership addition.
    pub(crate) fn stage_enter(&mut self, id: EntityId) -> Result<(), Fault> {
        if self.staged_enter.insert(id) {
            Ok(())
        } else {
            Err(Fault::DuplicateEntry)
        }
    }

    /// Stage a pending membership removal.
    ///
    /// Also cancels a not-yet-committed staged enter for the same id: an
    /// entity that entered and left this cell within a single tick passed
    /// through and must not stick as a resident.
    pub(crate) fn stage_exit(&mut self, id: EntityId) {
        self.staged_enter.remove(&id);
        self.staged_exit.insert(id);
    }

    /// Append one event to the batch and adjust the matching concern
    /// counter. Called once per affected neighbor cell at transition time.
    pub(crate) fn write_op(&mut self, kind: OpKind, id: EntityId, pos: Vec2, drive: DriveMode) {
        match kind {
            OpKind::Enter => {
                match drive {
                    DriveMode::Client => self.client_concern += 1,
                    DriveMode::Server => self.server_concern += 1,
                }
                self.batch.push_enter(id, pos);
            }
            OpKind::Move => self.batch.push_move(id, pos),
            OpKind::Exit => {
                match drive {
                    DriveMode::Client => self.client_concern -= 1,
                    DriveMode::Server => self.server_concern -= 1,
                }
                self.batch.push_exit(id);
            }
        }
    }

    /// Apply staged membership changes: exits first, then enters, then
    /// clear both staged sets.
    ///
    /// Exit-before-enter is a contract: an entity that left and re-entered
    /// this cell within one tick must end up resident exactly once.
    pub(crate) fn commit(&mut self) {
        for id in &self.staged_exit {
            self.residents.remove(id);
        }
        for id in &self.staged_enter {
            self.residents.insert(*id);
        }
        self.staged_exit.clear();
        self.staged_enter.clear();
    }
}
