use crate::{Bytes32, Epoch};
use serde::{Deserialize, Serialize};

/// An epoch/root pair a node considers irreversible.
///
/// Peers advertise their highest finalized checkpoint during status
/// exchange; peer selection ranks candidates by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: Bytes32,
}

impl Checkpoint {
    pub fn new(epoch: Epoch, root: Bytes32) -> Self {
        Self { epoch, root }
    }
}
