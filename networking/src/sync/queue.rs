use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use libp2p_identity::PeerId;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use containers::{BlocksByRangeRequest, Epoch, SignedBeaconBlock, Slot};

use crate::sync::config::{BlocksQueueConfig, PEER_REFRESH_INTERVAL, StallPolicy};
use crate::sync::error::SyncError;
use crate::sync::fetcher::{BlocksFetcher, SyncNetwork};
use crate::sync::peers::PeerDirectory;

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl QueueState {
    fn can_transition_to(self, next: QueueState) -> bool {
        matches!(
            (self, next),
            (QueueState::Idle, QueueState::Running)
                | (QueueState::Running, QueueState::Draining)
                | (QueueState::Running, QueueState::Stopped)
                | (QueueState::Draining, QueueState::Stopped)
        )
    }
}

/// One contiguous span of slots fetched as a unit.
#[derive(Clone, Copy, Debug)]
struct SubRange {
    start: Slot,
    count: u64,
    attempts: u32,
    last_peer: Option<PeerId>,
}

/// Multi-peer fetch scheduler for a fixed, finalized slot range.
///
/// Sub-ranges are fetched concurrently from distinct peers, buffered in an
/// ordered reorder map, and emitted strictly in slot order on the receiver
/// returned by [`Self::start`]. A sub-range that keeps failing is retried
/// against other peers up to the configured ceiling, then handled per the
/// [`StallPolicy`].
pub struct BlocksQueue<N, P> {
    config: BlocksQueueConfig,
    fetcher: Arc<BlocksFetcher<N>>,
    peers: Arc<P>,
    state: Arc<Mutex<QueueState>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    fatal: Arc<Mutex<Option<SyncError>>>,
}

impl<N, P> BlocksQueue<N, P>
where
    N: SyncNetwork + 'static,
    P: PeerDirectory + 'static,
{
    pub fn new(config: BlocksQueueConfig, fetcher: Arc<BlocksFetcher<N>>, peers: Arc<P>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            fetcher,
            peers,
            state: Arc::new(Mutex::new(QueueState::Idle)),
            shutdown_tx,
            shutdown_rx,
            coordinator: Mutex::new(None),
            fatal: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> QueueState {
        *self.state.lock()
    }

    /// The fatal error that shut the queue down, if any. Consuming.
    pub fn take_fatal(&self) -> Option<SyncError> {
        self.fatal.lock().take()
    }

    /// Spawn the coordinator and return the ordered block stream. The
    /// receiver closes once the range is exhausted or the queue stops.
    pub fn start(&self) -> Result<mpsc::Receiver<SignedBeaconBlock>, SyncError> {
        if !self.transition(QueueState::Running) {
            return Err(SyncError::AlreadyStarted);
        }
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let coordinator = Coordinator {
            config: self.config.clone(),
            fetcher: Arc::clone(&self.fetcher),
            peers: Arc::clone(&self.peers),
            state: Arc::clone(&self.state),
            fatal: Arc::clone(&self.fatal),
            shutdown_tx: self.shutdown_tx.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
        };
        let handle = tokio::spawn(coordinator.run(output_tx));
        *self.coordinator.lock() = Some(handle);
        Ok(output_rx)
    }

    /// Signal shutdown and wait for the coordinator to drain its in-flight
    /// fetches. Idempotent.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.coordinator.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn transition(&self, next: QueueState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }
}

type FetchResult = (SubRange, PeerId, Result<Vec<SignedBeaconBlock>, SyncError>);

struct Coordinator<N, P> {
    config: BlocksQueueConfig,
    fetcher: Arc<BlocksFetcher<N>>,
    peers: Arc<P>,
    state: Arc<Mutex<QueueState>>,
    fatal: Arc<Mutex<Option<SyncError>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<N, P> Coordinator<N, P>
where
    N: SyncNetwork + 'static,
    P: PeerDirectory + 'static,
{
    async fn run(mut self, output_tx: mpsc::Sender<SignedBeaconBlock>) {
        let (results_tx, mut results_rx) =
            mpsc::channel::<FetchResult>(self.config.max_concurrent_fetches + 1);

        // Sub-ranges awaiting dispatch, keyed by start slot so retries slot
        // back into order.
        let mut pending: BTreeMap<u64, SubRange> = BTreeMap::new();
        // Fetched sub-ranges awaiting their turn in the emit order.
        let mut completed: BTreeMap<u64, Vec<SignedBeaconBlock>> = BTreeMap::new();
        // Start slots given up on under `StallPolicy::Skip`.
        let mut failed: HashSet<u64> = HashSet::new();
        let mut emit_order: VecDeque<u64> = VecDeque::new();
        let mut busy: HashSet<PeerId> = HashSet::new();
        let mut in_flight = 0usize;

        for sub_range in self.partition() {
            pending.insert(sub_range.start.0, sub_range);
            emit_order.push_back(sub_range.start.0);
        }
        info!(
            start_slot = %self.config.start_slot,
            highest_expected_slot = %self.config.highest_expected_slot,
            sub_ranges = emit_order.len(),
            "blocks queue started",
        );

        'main: loop {
            // Dispatch as many pending sub-ranges as concurrency and peer
            // availability allow.
            while in_flight < self.config.max_concurrent_fetches {
                let Some((start, sub_range)) = pending.pop_first() else {
                    break;
                };
                let Some(peer) = self.select_peer(&busy, sub_range.last_peer) else {
                    pending.insert(start, sub_range);
                    break;
                };
                busy.insert(peer);
                in_flight += 1;
                self.spawn_fetch(sub_range, peer, results_tx.clone());
            }

            if in_flight == 0 && pending.is_empty() && completed.is_empty() {
                break 'main;
            }

            if in_flight == 0 {
                // Nothing running and no usable peer: wait for the peer set
                // to change.
                debug!("no suitable peers, waiting");
                tokio::select! {
                    _ = tokio::time::sleep(PEER_REFRESH_INTERVAL) => {}
                    _ = self.shutdown_rx.changed() => break 'main,
                }
            } else {
                tokio::select! {
                    _ = self.shutdown_rx.changed() => break 'main,
                    result = results_rx.recv() => {
                        // The senders outlive this loop, recv cannot yield
                        // None while fetches are in flight.
                        let Some((sub_range, peer, outcome)) = result else {
                            break 'main;
                        };
                        in_flight -= 1;
                        busy.remove(&peer);
                        match outcome {
                            Ok(blocks) => {
                                completed.insert(
                                    sub_range.start.0,
                                    self.normalize(&sub_range, blocks),
                                );
                            }
                            Err(SyncError::Canceled) => break 'main,
                            Err(err) => {
                                if !self.requeue(&mut pending, &mut failed, sub_range, peer, err) {
                                    break 'main;
                                }
                            }
                        }
                    }
                }
            }

            // Emit every sub-range that is next in order and ready.
            while let Some(&front) = emit_order.front() {
                if failed.remove(&front) {
                    emit_order.pop_front();
                    continue;
                }
                let Some(blocks) = completed.remove(&front) else {
                    break;
                };
                emit_order.pop_front();
                for block in blocks {
                    tokio::select! {
                        sent = output_tx.send(block) => {
                            if sent.is_err() {
                                // Receiver gone, nothing left to feed.
                                break 'main;
                            }
                        }
                        _ = self.shutdown_rx.changed() => break 'main,
                    }
                }
            }
        }

        self.transition(QueueState::Draining);
        let _ = self.shutdown_tx.send(true);
        while in_flight > 0 {
            if results_rx.recv().await.is_some() {
                in_flight -= 1;
            } else {
                break;
            }
        }
        self.transition(QueueState::Stopped);
        info!("blocks queue stopped");
    }

    fn partition(&self) -> Vec<SubRange> {
        let batch = self
            .config
            .batch_size
            .min(self.fetcher.blocks_per_request())
            .max(1);
        let mut sub_ranges = Vec::new();
        let mut start = self.config.start_slot.0;
        while start <= self.config.highest_expected_slot.0 {
            let count = batch.min(self.config.highest_expected_slot.0 - start + 1);
            sub_ranges.push(SubRange {
                start: Slot(start),
                count,
                attempts: 0,
                last_peer: None,
            });
            start += count;
        }
        sub_ranges
    }

    fn spawn_fetch(&self, sub_range: SubRange, peer: PeerId, results_tx: mpsc::Sender<FetchResult>) {
        let fetcher = Arc::clone(&self.fetcher);
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let request = BlocksByRangeRequest::contiguous(sub_range.start, sub_range.count);
            let outcome = fetcher
                .request_blocks(&mut shutdown_rx, &request, &peer)
                .await;
            let _ = results_tx.send((sub_range, peer, outcome)).await;
        });
    }

    /// Drop out-of-range and duplicate slots, order the rest. Misbehaving
    /// peers must not be able to smuggle blocks past the range accounting.
    fn normalize(
        &self,
        sub_range: &SubRange,
        mut blocks: Vec<SignedBeaconBlock>,
    ) -> Vec<SignedBeaconBlock> {
        let end = sub_range.start.0 + sub_range.count;
        blocks.retain(|block| {
            let slot = block.message.slot.0;
            slot >= sub_range.start.0 && slot < end
        });
        blocks.sort_by_key(|block| block.message.slot);
        blocks.dedup_by_key(|block| block.message.slot);
        blocks
    }

    /// Put a failed sub-range back in line, or apply the stall policy once
    /// its retries are exhausted. Returns false when the queue must abort.
    fn requeue(
        &self,
        pending: &mut BTreeMap<u64, SubRange>,
        failed: &mut HashSet<u64>,
        mut sub_range: SubRange,
        peer: PeerId,
        err: SyncError,
    ) -> bool {
        sub_range.attempts += 1;
        sub_range.last_peer = Some(peer);
        if sub_range.attempts <= self.config.max_retries {
            debug!(
                start_slot = %sub_range.start,
                attempts = sub_range.attempts,
                error = %err,
                "sub-range fetch failed, retrying",
            );
            pending.insert(sub_range.start.0, sub_range);
            return true;
        }
        match self.config.stall_policy {
            StallPolicy::Skip => {
                warn!(
                    start_slot = %sub_range.start,
                    count = sub_range.count,
                    attempts = sub_range.attempts,
                    error = %err,
                    "sub-range exhausted retries, skipping",
                );
                failed.insert(sub_range.start.0);
                true
            }
            StallPolicy::Abort => {
                warn!(
                    start_slot = %sub_range.start,
                    attempts = sub_range.attempts,
                    error = %err,
                    "sub-range exhausted retries, aborting",
                );
                *self.fatal.lock() = Some(SyncError::Stall {
                    start_slot: sub_range.start,
                    attempts: sub_range.attempts,
                });
                false
            }
        }
    }

    fn select_peer(&self, busy: &HashSet<PeerId>, avoid: Option<PeerId>) -> Option<PeerId> {
        let mut candidates: Vec<(PeerId, Epoch)> = self
            .peers
            .best_finalized(self.config.max_concurrent_fetches * 2, self.min_peer_epoch())
            .into_iter()
            .filter(|peer| !busy.contains(peer))
            .filter_map(|peer| {
                self.peers
                    .chain_state(&peer)
                    .map(|status| (peer, status.finalized.epoch))
            })
            .collect();
        // Prefer a peer other than the one that just failed this sub-range,
        // when there is a choice.
        if let Some(avoid) = avoid {
            if candidates.iter().any(|(peer, _)| *peer != avoid) {
                candidates.retain(|(peer, _)| *peer != avoid);
            }
        }
        let best_epoch = candidates.iter().map(|(_, epoch)| *epoch).max()?;
        candidates.retain(|(_, epoch)| *epoch == best_epoch);
        candidates
            .choose(&mut rand::thread_rng())
            .map(|(peer, _)| *peer)
    }

    /// Peers must have finalized at least up to the queue's target range.
    fn min_peer_epoch(&self) -> Epoch {
        Slot(self.config.highest_expected_slot.0.saturating_sub(1)).epoch()
    }

    fn transition(&self, next: QueueState) {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
        }
    }
}
