use async_trait::async_trait;
use containers::{Bytes32, SignedBeaconBlock, Slot};

/// Read-only view of persisted blocks, used for parent-linkage checks.
pub trait BlockStorage: Send + Sync {
    fn has_block(&self, root: &Bytes32) -> bool;
}

/// The chain surface the sync pipeline drives blocks into.
#[async_trait]
pub trait ChainAccess: Send + Sync {
    /// Slot of the current chain head.
    fn head_slot(&self) -> Slot;

    /// Whether `root` is held in the initial-sync cache: received this run
    /// but not yet persisted. Parents may live here instead of storage.
    fn has_init_sync_block(&self, root: &Bytes32) -> bool;

    /// Process a block during initial sync. Verification may be batched and
    /// persistence deferred.
    async fn receive_block_initial_sync(&self, block: SignedBeaconBlock) -> anyhow::Result<()>;

    /// Process a block through the regular (fully verified) path.
    async fn receive_block(&self, block: SignedBeaconBlock) -> anyhow::Result<()>;
}
