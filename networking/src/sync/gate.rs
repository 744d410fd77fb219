use containers::{Bytes32, SignedBeaconBlock, Slot, block_root};

use crate::sync::chain::{BlockStorage, ChainAccess};
use crate::sync::error::SyncError;

/// Which chain path a block is admitted through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Batched verification, deferred persistence.
    InitialSync,
    /// Fully verified per-block path.
    Direct,
}

/// Last line of defense before a fetched block reaches the chain.
///
/// Tracks a watermark of the last slot handed over and enforces two
/// invariants: slots advance strictly, and every block's parent is already
/// known, either persisted or held in the initial-sync cache. The watermark
/// only moves when the chain accepts the block, so a rejected block can be
/// retried at the same slot.
pub struct AdmissionGate {
    last_processed_slot: Slot,
}

impl AdmissionGate {
    pub fn new(head_slot: Slot) -> Self {
        Self {
            last_processed_slot: head_slot,
        }
    }

    pub fn watermark(&self) -> Slot {
        self.last_processed_slot
    }

    /// Validate linkage and ordering, then hand `block` to the chain via
    /// the path selected by `mode`. Returns the admitted block's root.
    pub async fn admit<C, S>(
        &mut self,
        chain: &C,
        storage: &S,
        block: SignedBeaconBlock,
        mode: ReceiveMode,
    ) -> Result<Bytes32, SyncError>
    where
        C: ChainAccess,
        S: BlockStorage,
    {
        let slot = block.message.slot;
        if slot <= self.last_processed_slot {
            return Err(SyncError::SlotNotMonotonic {
                slot,
                watermark: self.last_processed_slot,
            });
        }

        let parent_root = block.message.parent_root;
        if !storage.has_block(&parent_root) && !chain.has_init_sync_block(&parent_root) {
            return Err(SyncError::OrphanBlock { slot, parent_root });
        }

        let root = block_root(&block.message);
        match mode {
            ReceiveMode::InitialSync => chain.receive_block_initial_sync(block).await,
            ReceiveMode::Direct => chain.receive_block(block).await,
        }
        .map_err(SyncError::Rejected)?;

        self.last_processed_slot = slot;
        Ok(root)
    }
}
