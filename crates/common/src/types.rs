use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Unique identifier for a tracked entity.
///
/// Ids are assigned by the session layer and travel on the wire, so this is
/// a plain `u64` newtype rather than an engine-generated id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of who drives an entity's movement.
///
/// Client-driven entities have an observer that needs visibility updates;
/// server-driven entities are simulated only and never receive deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriveMode {
    Client,
    Server,
}

impl DriveMode {
    pub fn is_client(self) -> bool {
        matches!(self, DriveMode::Client)
    }
}

/// A 2D cell coordinate in the world grid (world space partitioned on XZ).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Convert a world position to the coordinate of the cell containing it.
    pub fn from_pos(pos: Vec2, cell_size: f32) -> Self {
        Self {
            x: (pos.x / cell_size).floor() as i32,
            z: (pos.y / cell_size).floor() as i32,
        }
    }
}

impl std::fmt::Display for CellCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.z)
    }
}
