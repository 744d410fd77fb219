use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};
use libp2p_identity::PeerId;
use tokio::sync::watch;
use tracing::debug;

use containers::{BlocksByRangeRequest, SignedBeaconBlock};

use crate::codec::{read_chunk, write_chunk};
use crate::encoding::SnappyPayload;
use crate::sync::error::SyncError;
use crate::sync::rate::ThroughputStrategy;

/// Transport hook: opens a fresh bidirectional stream to a peer for one
/// blocks-by-range exchange.
#[async_trait]
pub trait SyncNetwork: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    async fn open_block_stream(&self, peer: &PeerId) -> Result<Self::Stream, SyncError>;
}

/// Issues blocks-by-range requests and collects the chunked responses.
///
/// The request size is retuned from observed throughput via the injected
/// [`ThroughputStrategy`]; callers read [`Self::blocks_per_request`] when
/// building requests.
pub struct BlocksFetcher<N> {
    network: Arc<N>,
    encoding: SnappyPayload,
    blocks_per_request: AtomicU64,
    throughput: Arc<dyn ThroughputStrategy>,
}

impl<N: SyncNetwork> BlocksFetcher<N> {
    pub fn new(
        network: Arc<N>,
        initial_blocks_per_request: u64,
        throughput: Arc<dyn ThroughputStrategy>,
    ) -> Self {
        Self {
            network,
            encoding: SnappyPayload,
            blocks_per_request: AtomicU64::new(initial_blocks_per_request),
            throughput,
        }
    }

    /// Current request size, as last tuned.
    pub fn blocks_per_request(&self) -> u64 {
        self.blocks_per_request.load(Ordering::Relaxed)
    }

    /// Re-derive the request size from an observed processing rate.
    pub fn retune(&self, observed_rate: f64, half_rtt: Duration) {
        let sized = self.throughput.blocks_per_request(observed_rate, half_rtt);
        self.blocks_per_request.store(sized, Ordering::Relaxed);
    }

    /// Send `request` to `peer` and read response chunks until the peer
    /// closes the stream or `request.count` blocks have arrived.
    ///
    /// A short response is not an error here; the caller accounts for which
    /// slots actually arrived. Cancellation via `shutdown` surfaces as
    /// [`SyncError::Canceled`] at the next await point.
    pub async fn request_blocks(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        request: &BlocksByRangeRequest,
        peer: &PeerId,
    ) -> Result<Vec<SignedBeaconBlock>, SyncError> {
        if *shutdown.borrow() {
            return Err(SyncError::Canceled);
        }

        let mut stream = tokio::select! {
            opened = self.network.open_block_stream(peer) => opened?,
            _ = shutdown.changed() => return Err(SyncError::Canceled),
        };

        write_chunk(&mut stream, &self.encoding, request).await?;
        debug!(
            peer = %peer,
            start_slot = %request.start_slot,
            count = request.count,
            "requested block range",
        );

        let mut blocks = Vec::with_capacity(request.count.min(1024) as usize);
        for _ in 0..request.count {
            let chunk = tokio::select! {
                chunk = read_chunk(&mut stream, &self.encoding) => chunk?,
                _ = shutdown.changed() => return Err(SyncError::Canceled),
            };
            match chunk {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        debug!(peer = %peer, received = blocks.len(), "block range complete");
        Ok(blocks)
    }
}
