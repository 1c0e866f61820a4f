//! Ingress: thread-safe command queues between concurrent producers and
//! the single-threaded tick loop.
//!
//! # Invariants
//! - The grid itself is never touched off the tick thread; all lifecycle
//!   calls funnel through these queues.
//! - A drain applies everything pending, in exit / enter / move order,
//!   before the collaborator runs `tick`.

mod queue;

pub use queue::{CommandDrain, CommandQueue, DrainStats, channel};

pub fn crate_info() -> &'static str {
    "sightline-ingress v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("ingress"));
    }
}
