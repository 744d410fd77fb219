use crate::{Checkpoint, Slot};
use serde::{Deserialize, Serialize};

/// Chain state a peer last advertised: its finalized checkpoint and head
/// slot. Owned by the external peer-connection manager; read-only and
/// untrusted here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    pub finalized: Checkpoint,
    pub head_slot: Slot,
}

impl Status {
    pub fn new(finalized: Checkpoint, head_slot: Slot) -> Self {
        Self {
            finalized,
            head_slot,
        }
    }
}
