use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;
use tracing::{error, info};

use containers::{BlocksByRangeRequest, Slot};

use crate::sync::chain::{BlockStorage, ChainAccess};
use crate::sync::config::{COUNTER_WINDOW, SyncConfig};
use crate::sync::error::SyncError;
use crate::sync::fetcher::{BlocksFetcher, SyncNetwork};
use crate::sync::gate::{AdmissionGate, ReceiveMode};
use crate::sync::peers::{PeerDirectory, highest_finalized_epoch};
use crate::sync::queue::BlocksQueue;
use crate::sync::rate::RateCounter;

/// Cancels a running [`RoundRobinSync`] from another task.
#[derive(Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.0.send(true);
    }
}

/// Two-phase initial sync orchestrator.
///
/// Phase one drives a multi-peer [`BlocksQueue`] up to the network's
/// finalized checkpoint. Phase two polls the single best peer for the
/// remaining non-finalized slots until the wall-clock head is reached.
pub struct RoundRobinSync<N, P, C, S> {
    peers: Arc<P>,
    chain: Arc<C>,
    storage: Arc<S>,
    fetcher: Arc<BlocksFetcher<N>>,
    counter: RateCounter,
    config: SyncConfig,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<N, P, C, S> RoundRobinSync<N, P, C, S>
where
    N: SyncNetwork + 'static,
    P: PeerDirectory + 'static,
    C: ChainAccess,
    S: BlockStorage,
{
    pub fn new(
        network: Arc<N>,
        peers: Arc<P>,
        chain: Arc<C>,
        storage: Arc<S>,
        config: SyncConfig,
    ) -> Self {
        let fetcher = Arc::new(BlocksFetcher::new(
            network,
            config.batch_size,
            Arc::clone(&config.throughput),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            peers,
            chain,
            storage,
            fetcher,
            counter: RateCounter::new(COUNTER_WINDOW),
            config,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Run the full sync to the current wall-clock head slot.
    pub async fn start(&mut self, genesis_time: SystemTime) -> Result<(), SyncError> {
        let mut gate = AdmissionGate::new(self.chain.head_slot());
        self.sync_to_finalized(&mut gate, genesis_time).await?;

        if self.chain.head_slot() == Slot::since_genesis(genesis_time) {
            info!(slot = %self.chain.head_slot(), "already synced to head");
            return Ok(());
        }
        self.sync_to_head(&mut gate, genesis_time).await
    }

    /// Phase one: queue-driven multi-peer sync up to the highest finalized
    /// epoch any peer reports.
    async fn sync_to_finalized(
        &mut self,
        gate: &mut AdmissionGate,
        genesis_time: SystemTime,
    ) -> Result<(), SyncError> {
        let finalized_epoch = highest_finalized_epoch(self.peers.as_ref());
        let target_slot = finalized_epoch.next().start_slot();
        let head_slot = self.chain.head_slot();
        if target_slot <= head_slot {
            return Ok(());
        }
        info!(
            finalized_epoch = %finalized_epoch,
            target_slot = %target_slot,
            head_slot = %head_slot,
            "syncing to finalized checkpoint",
        );

        let queue = BlocksQueue::new(
            self.config.queue_config(Slot(head_slot.0 + 1), target_slot),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.peers),
        );
        let mut blocks_rx = queue.start()?;

        let mut canceled = false;
        loop {
            let block = tokio::select! {
                block = blocks_rx.recv() => block,
                _ = self.shutdown_rx.changed() => {
                    canceled = true;
                    break;
                }
            };
            let Some(block) = block else {
                break;
            };
            let slot = block.message.slot;
            match gate
                .admit(
                    self.chain.as_ref(),
                    self.storage.as_ref(),
                    block,
                    ReceiveMode::InitialSync,
                )
                .await
            {
                Ok(root) => self.log_sync_status(&root, slot, genesis_time),
                Err(err) => {
                    info!(slot = %slot, error = %err, "block not processed");
                }
            }
        }
        queue.stop().await;
        if canceled {
            return Err(SyncError::Canceled);
        }
        if let Some(fatal) = queue.take_fatal() {
            return Err(fatal);
        }
        Ok(())
    }

    /// Phase two: poll the single best peer for non-finalized blocks until
    /// the wall-clock head is reached.
    ///
    /// A failed batch is logged and ends the phase without error; regular
    /// sync takes over from wherever the head landed.
    async fn sync_to_head(
        &mut self,
        gate: &mut AdmissionGate,
        genesis_time: SystemTime,
    ) -> Result<(), SyncError> {
        let finalized_epoch = highest_finalized_epoch(self.peers.as_ref());
        let peer = loop {
            if let Some(peer) = self
                .peers
                .best_finalized(1, finalized_epoch)
                .into_iter()
                .next()
            {
                break peer;
            }
            info!("no suitable peer for head sync, waiting");
            tokio::select! {
                _ = tokio::time::sleep(self.config.peer_refresh_interval) => {}
                _ = self.shutdown_rx.changed() => return Err(SyncError::Canceled),
            }
        };
        info!(peer = %peer, head_slot = %self.chain.head_slot(), "syncing to head");

        while self.chain.head_slot() < Slot::since_genesis(genesis_time) {
            let head_slot = self.chain.head_slot();
            let current_slot = Slot::since_genesis(genesis_time);
            let count = (current_slot.0 - head_slot.0 + 1)
                .min(self.fetcher.blocks_per_request())
                .max(1);
            let request = BlocksByRangeRequest::contiguous(Slot(head_slot.0 + 1), count);

            let mut shutdown_rx = self.shutdown_rx.clone();
            let blocks = match self
                .fetcher
                .request_blocks(&mut shutdown_rx, &request, &peer)
                .await
            {
                Ok(blocks) => blocks,
                Err(SyncError::Canceled) => return Err(SyncError::Canceled),
                Err(err) => {
                    error!(peer = %peer, error = %err, "head sync batch failed");
                    return Ok(());
                }
            };
            if blocks.is_empty() {
                break;
            }
            for block in blocks {
                let slot = block.message.slot;
                match gate
                    .admit(
                        self.chain.as_ref(),
                        self.storage.as_ref(),
                        block,
                        ReceiveMode::Direct,
                    )
                    .await
                {
                    Ok(root) => self.log_sync_status(&root, slot, genesis_time),
                    Err(err) => {
                        error!(slot = %slot, error = %err, "head sync block rejected");
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    fn log_sync_status(&mut self, root: &containers::Bytes32, slot: Slot, genesis_time: SystemTime) {
        self.counter.incr();
        let blocks_per_second = self.counter.rate().max(1.0);
        self.fetcher.retune(blocks_per_second, self.config.half_rtt);

        let current_slot = Slot::since_genesis(genesis_time);
        let remaining = current_slot.0.saturating_sub(slot.0);
        let eta_secs = (remaining as f64 / blocks_per_second).round() as u64;
        let root_hex = root.to_string();
        info!(
            peers = self.peers.connected_peers().len(),
            blocks_per_second,
            slot = %slot,
            current_slot = %current_slot,
            eta_secs,
            root = &root_hex[..8],
            "processed block during sync",
        );
    }
}
