use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::SystemTime;

use crate::config::{SECONDS_PER_SLOT, SLOTS_PER_EPOCH};

/// A discrete time unit in which at most one canonical block may exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Slot(pub u64);

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Slot {
    /// Epoch containing this slot.
    pub fn epoch(self) -> Epoch {
        Epoch(self.0 / SLOTS_PER_EPOCH)
    }

    /// Slot implied by wall-clock time since genesis.
    ///
    /// Saturates at slot 0 when genesis lies in the future.
    pub fn since_genesis(genesis_time: SystemTime) -> Slot {
        let elapsed = SystemTime::now()
            .duration_since(genesis_time)
            .unwrap_or_default();
        Slot(elapsed.as_secs() / SECONDS_PER_SLOT)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed-size consecutive group of slots used for checkpointing.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Epoch(pub u64);

impl Epoch {
    /// First slot of this epoch.
    pub fn start_slot(self) -> Slot {
        Slot(self.0 * SLOTS_PER_EPOCH)
    }

    pub fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
