//! Spatial interest management: sparse cell grid, incremental visibility
//! deltas, two-phase tick.
//!
//! # Invariants
//! - A cell's 3x3 neighborhood is computed at most once and never changes.
//! - An entity is resident in at most one cell at any committed point.
//! - Membership changes are staged during transitions and applied only in
//!   the commit pass; no set is mutated while being iterated.
//! - Faults are absorbed and logged, never returned as control flow.

mod cell;
mod entity;
mod fault;
mod grid;

pub use cell::Cell;
pub use fault::{Fault, FaultCounters};
pub use grid::{CellMergeFn, EntityDeltaFn, GridConfig, InterestGrid};

pub fn crate_info() -> &'static str {
    "sightline-interest v0.1.0"
}
