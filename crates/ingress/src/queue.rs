use crossbeam_channel::{Receiver, Sender, unbounded};
use sightline_common::{DriveMode, EntityId};
use sightline_interest::InterestGrid;

struct EnterOp {
    id: EntityId,
    x: f32,
    z: f32,
    drive: DriveMode,
}

struct MoveOp {
    id: EntityId,
    x: f32,
    z: f32,
}

struct ExitOp {
    id: EntityId,
}

/// Cloneable producer handle. Safe to share across session threads; every
/// call is a non-blocking enqueue.
#[derive(Clone)]
pub struct CommandQueue {
    enters: Sender<EnterOp>,
    moves: Sender<MoveOp>,
    exits: Sender<ExitOp>,
}

impl CommandQueue {
    pub fn enter(&self, id: EntityId, x: f32, z: f32, drive: DriveMode) {
        if self.enters.send(EnterOp { id, x, z, drive }).is_err() {
            tracing::warn!(entity = %id, "enter dropped: drain side is gone");
        }
    }

    pub fn move_to(&self, id: EntityId, x: f32, z: f32) {
        if self.moves.send(MoveOp { id, x, z }).is_err() {
            tracing::warn!(entity = %id, "move dropped: drain side is gone");
        }
    }

    pub fn exit(&self, id: EntityId) {
        if self.exits.send(ExitOp { id }).is_err() {
            tracing::warn!(entity = %id, "exit dropped: drain side is gone");
        }
    }
}

/// Consumer side, owned by the tick thread.
pub struct CommandDrain {
    enters: Receiver<EnterOp>,
    moves: Receiver<MoveOp>,
    exits: Receiver<ExitOp>,
}

/// Number of commands applied by one drain, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub enters: usize,
    pub moves: usize,
    pub exits: usize,
}

impl DrainStats {
    pub fn total(&self) -> usize {
        self.enters + self.moves + self.exits
    }
}

impl CommandDrain {
    /// Apply everything pending to the grid: exits first, then enters,
    /// then moves. Commands enqueued while a drain runs are picked up
    /// either by this drain or the next one; nothing blocks.
    pub fn drain(&self, grid: &mut InterestGrid) -> DrainStats {
        let mut stats = DrainStats::default();
        while let Ok(op) = self.exits.try_recv() {
            grid.exit_world(op.id);
            stats.exits += 1;
        }
        while let Ok(op) = self.enters.try_recv() {
            grid.enter_world(op.id, op.x, op.z, op.drive);
            stats.enters += 1;
        }
        while let Ok(op) = self.moves.try_recv() {
            grid.move_to(op.id, op.x, op.z);
            stats.moves += 1;
        }
        if stats.total() > 0 {
            tracing::trace!(
                enters = stats.enters,
                moves = stats.moves,
                exits = stats.exits,
                "drained ingress queues"
            );
        }
        stats
    }
}

/// Create a connected producer/consumer pair over unbounded queues.
pub fn channel() -> (CommandQueue, CommandDrain) {
    let (enter_tx, enter_rx) = unbounded();
    let (move_tx, move_rx) = unbounded();
    let (exit_tx, exit_rx) = unbounded();
    (
        CommandQueue {
            enters: enter_tx,
            moves: move_tx,
            exits: exit_tx,
        },
        CommandDrain {
            enters: enter_rx,
            moves: move_rx,
            exits: exit_rx,
        },
    )
}
