use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Bytes32, Signature, Slot, ValidatorIndex};

/// The body of a block. The sync pipeline never looks inside it; state
/// transition happens behind the receiver callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockBody {
    pub graffiti: Bytes32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconBlock {
    pub slot: Slot,
    pub proposer_index: ValidatorIndex,
    pub parent_root: Bytes32,
    pub state_root: Bytes32,
    pub body: BlockBody,
}

/// Envelope carrying a block and the proposer's signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignedBeaconBlock {
    pub message: BeaconBlock,
    pub signature: Signature,
}

/// Content-addressed root of a block: sha256 over its canonical binary
/// encoding. This is the identity used for parent-linkage checks.
pub fn block_root(block: &BeaconBlock) -> Bytes32 {
    let encoded = bincode::serialize(block).expect("in-memory block encoding is infallible");
    let digest = Sha256::digest(&encoded);
    Bytes32(B256::from_slice(&digest))
}
