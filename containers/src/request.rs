use crate::Slot;
use serde::{Deserialize, Serialize};

/// Asks a peer for `count` blocks starting at `start_slot`, advancing by
/// `step` slots per block. Immutable once sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksByRangeRequest {
    pub start_slot: Slot,
    pub count: u64,
    pub step: u64,
}

impl BlocksByRangeRequest {
    /// A request for a contiguous range (step 1, the only step this client
    /// ever uses).
    pub fn contiguous(start_slot: Slot, count: u64) -> Self {
        Self {
            start_slot,
            count,
            step: 1,
        }
    }

    /// First slot past the requested range.
    pub fn end_slot(&self) -> Slot {
        Slot(self.start_slot.0 + self.count * self.step)
    }
}
