//! Shared leaf types for the sightline engine.
//!
//! # Invariants
//! - Types here are plain data: no grid state, no callbacks, no I/O.
//! - Event batches are reused across ticks; `clear` never reallocates.

pub mod events;
pub mod types;

pub use events::{EnterEvent, EventBatch, ExitEvent, MoveEvent};
pub use types::{CellCoord, DriveMode, EntityId};

pub fn crate_info() -> &'static str {
    "sightline-common v0.1.0"
}
