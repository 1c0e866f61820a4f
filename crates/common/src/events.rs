use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::types::EntityId;

/// An entity became visible: carries the position it appeared at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnterEvent {
    pub id: EntityId,
    pub x: f32,
    pub z: f32,
}

/// An entity moved within visibility: carries its new position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveEvent {
    pub id: EntityId,
    pub x: f32,
    pub z: f32,
}

/// An entity left visibility. Position is irrelevant once gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub id: EntityId,
}

/// The unit of notification payload: an ordered triple of enter, move and
/// exit event lists.
///
/// Batches are owned long-term (one per cell, one per tracked entity) and
/// reused every tick: `clear` resets the lengths but keeps the allocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub enters: Vec<EnterEvent>,
    pub moves: Vec<MoveEvent>,
    pub exits: Vec<ExitEvent>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_enter(&mut self, id: EntityId, pos: Vec2) {
        self.enters.push(EnterEvent {
            id,
            x: pos.x,
            z: pos.y,
        });
    }

    pub fn push_move(&mut self, id: EntityId, pos: Vec2) {
        self.moves.push(MoveEvent {
            id,
            x: pos.x,
            z: pos.y,
        });
    }

    pub fn push_exit(&mut self, id: EntityId) {
        self.exits.push(ExitEvent { id });
    }

    pub fn is_empty(&self) -> bool {
        self.enters.is_empty() && self.moves.is_empty() && self.exits.is_empty()
    }

    /// Total number of events across all three lists.
    pub fn len(&self) -> usize {
        self.enters.len() + self.moves.len() + self.exits.len()
    }

    /// Reset all three lists without releasing their buffers.
    pub fn clear(&mut self) {
        self.enters.clear();
        self.moves.clear();
        self.exits.clear();
    }
}
