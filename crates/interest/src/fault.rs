/// Non-fatal fault kinds detected and absorbed inside the engine.
///
/// None of these ever halt a tick or propagate to the caller; they surface
/// only through the log and the per-kind counters. The trade-off is a
/// possible transient view desync that recovers on the entity's next
/// successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("entity already staged or resident where it is being added")]
    DuplicateEntry,
    #[error("no materialized cell at a required coordinate")]
    UnknownCell,
    #[error("entity is not currently tracked")]
    NotResident,
}

/// Running counts of absorbed faults, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FaultCounters {
    pub duplicate_entry: u64,
    pub unknown_cell: u64,
    pub not_resident: u64,
}

impl FaultCounters {
    pub(crate) fn record(&mut self, fault: Fault) {
        match fault {
            Fault::DuplicateEntry => self.duplicate_entry += 1,
            Fault::UnknownCell => self.unknown_cell += 1,
            Fault::NotResident => self.not_resident += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.duplicate_entry + self.unknown_cell + self.not_resident
    }
}
