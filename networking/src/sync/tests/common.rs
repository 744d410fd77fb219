//! Shared doubles for sync tests: an in-memory peer directory, a scripted
//! network whose streams answer range requests from a canned chain, and a
//! recording chain backend.

use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::io::Cursor;
use futures::{AsyncRead, AsyncWrite};
use libp2p_identity::PeerId;
use parking_lot::Mutex;

use containers::{
    BlocksByRangeRequest, Bytes32, Checkpoint, Epoch, SignedBeaconBlock, Slot, Status, block_root,
};

use crate::codec::RESPONSE_CODE_SUCCESS;
use crate::encoding::{PayloadEncoding, SnappyPayload};
use crate::sync::chain::{BlockStorage, ChainAccess};
use crate::sync::error::SyncError;
use crate::sync::fetcher::SyncNetwork;
use crate::sync::gate::ReceiveMode;
use crate::sync::peers::PeerDirectory;

pub fn create_test_block(slot: u64, parent_root: Bytes32) -> SignedBeaconBlock {
    let mut block = SignedBeaconBlock::default();
    block.message.slot = Slot(slot);
    block.message.parent_root = parent_root;
    block
}

/// A parent-linked chain covering slots `0..=max_slot`, one block per slot.
pub fn build_chain(max_slot: u64) -> Vec<SignedBeaconBlock> {
    let mut blocks = Vec::with_capacity(max_slot as usize + 1);
    let mut parent_root = Bytes32::default();
    for slot in 0..=max_slot {
        let block = create_test_block(slot, parent_root);
        parent_root = block_root(&block.message);
        blocks.push(block);
    }
    blocks
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buffer = unsigned_varint::encode::usize_buffer();
    let length = unsigned_varint::encode::usize(payload.len(), &mut buffer);
    let mut framed = vec![RESPONSE_CODE_SUCCESS];
    framed.extend_from_slice(length);
    framed.extend_from_slice(payload);
    framed
}

/// One side of a range exchange: buffers the written request, then serves
/// the matching chain blocks as response chunks, up to `serve_limit`.
pub struct RangeServerStream {
    chain: Arc<Vec<SignedBeaconBlock>>,
    serve_limit: u64,
    written: Vec<u8>,
    response: Option<Cursor<Vec<u8>>>,
}

impl RangeServerStream {
    pub fn new(chain: Arc<Vec<SignedBeaconBlock>>, serve_limit: u64) -> Self {
        Self {
            chain,
            serve_limit,
            written: Vec::new(),
            response: None,
        }
    }

    fn build_response(&self) -> Vec<u8> {
        let (length, rest) =
            unsigned_varint::decode::usize(&self.written[1..]).expect("request length prefix");
        let request: BlocksByRangeRequest = SnappyPayload
            .decode(&rest[..length])
            .expect("request payload");

        let mut response = Vec::new();
        for block in self.chain.iter() {
            let slot = block.message.slot.0;
            if slot >= request.start_slot.0
                && slot < request.start_slot.0 + request.count
                && slot <= self.serve_limit
            {
                let payload = SnappyPayload.encode(block).expect("block payload");
                response.extend_from_slice(&frame(&payload));
            }
        }
        response
    }
}

impl AsyncWrite for RangeServerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for RangeServerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.response.is_none() {
            this.response = Some(Cursor::new(this.build_response()));
        }
        let cursor = this.response.as_mut().expect("response built above");
        Pin::new(cursor).poll_read(cx, buf)
    }
}

#[derive(Clone)]
pub struct PeerBehavior {
    pub open_delay: Duration,
    pub fail_opens: u32,
    pub serve_limit: u64,
}

impl Default for PeerBehavior {
    fn default() -> Self {
        Self {
            open_delay: Duration::ZERO,
            fail_opens: 0,
            serve_limit: u64::MAX,
        }
    }
}

/// Network double serving every peer from one shared chain, with per-peer
/// open latency and scripted open failures.
pub struct MockNetwork {
    chain: Arc<Vec<SignedBeaconBlock>>,
    behaviors: Mutex<HashMap<PeerId, PeerBehavior>>,
}

impl MockNetwork {
    pub fn new(chain: Vec<SignedBeaconBlock>) -> Self {
        Self {
            chain: Arc::new(chain),
            behaviors: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_behavior(&self, peer: PeerId, behavior: PeerBehavior) {
        self.behaviors.lock().insert(peer, behavior);
    }
}

#[async_trait]
impl SyncNetwork for MockNetwork {
    type Stream = RangeServerStream;

    async fn open_block_stream(&self, peer: &PeerId) -> Result<Self::Stream, SyncError> {
        let behavior = {
            let mut behaviors = self.behaviors.lock();
            let entry = behaviors.entry(*peer).or_default();
            if entry.fail_opens > 0 {
                entry.fail_opens -= 1;
                return Err(SyncError::Connection("scripted open failure".into()));
            }
            entry.clone()
        };
        if !behavior.open_delay.is_zero() {
            tokio::time::sleep(behavior.open_delay).await;
        }
        Ok(RangeServerStream::new(
            Arc::clone(&self.chain),
            behavior.serve_limit,
        ))
    }
}

#[derive(Default)]
pub struct MockPeers {
    states: Mutex<HashMap<PeerId, Status>>,
}

impl MockPeers {
    pub fn add_peer(&self, finalized_epoch: u64, head_slot: u64) -> PeerId {
        let peer = PeerId::random();
        let status = Status::new(
            Checkpoint::new(Epoch(finalized_epoch), Bytes32::default()),
            Slot(head_slot),
        );
        self.states.lock().insert(peer, status);
        peer
    }
}

impl PeerDirectory for MockPeers {
    fn connected_peers(&self) -> Vec<PeerId> {
        self.states.lock().keys().copied().collect()
    }

    fn chain_state(&self, peer: &PeerId) -> Option<Status> {
        self.states.lock().get(peer).copied()
    }
}

/// Chain double recording which path each block arrived through. The head
/// follows the highest accepted slot, and accepted roots land in the
/// init-sync cache so children can link against them.
pub struct MockChain {
    head: Mutex<Slot>,
    cached_roots: Mutex<HashSet<Bytes32>>,
    received: Mutex<Vec<(Slot, ReceiveMode)>>,
    reject_slots: Mutex<HashSet<u64>>,
}

impl MockChain {
    pub fn new(head_slot: u64) -> Self {
        Self {
            head: Mutex::new(Slot(head_slot)),
            cached_roots: Mutex::new(HashSet::new()),
            received: Mutex::new(Vec::new()),
            reject_slots: Mutex::new(HashSet::new()),
        }
    }

    pub fn reject_slot(&self, slot: u64) {
        self.reject_slots.lock().insert(slot);
    }

    pub fn received(&self) -> Vec<(Slot, ReceiveMode)> {
        self.received.lock().clone()
    }

    fn accept(&self, block: SignedBeaconBlock, mode: ReceiveMode) -> anyhow::Result<()> {
        let slot = block.message.slot;
        if self.reject_slots.lock().contains(&slot.0) {
            anyhow::bail!("scripted rejection at slot {slot}");
        }
        self.cached_roots.lock().insert(block_root(&block.message));
        self.received.lock().push((slot, mode));
        let mut head = self.head.lock();
        if slot > *head {
            *head = slot;
        }
        Ok(())
    }
}

#[async_trait]
impl ChainAccess for MockChain {
    fn head_slot(&self) -> Slot {
        *self.head.lock()
    }

    fn has_init_sync_block(&self, root: &Bytes32) -> bool {
        self.cached_roots.lock().contains(root)
    }

    async fn receive_block_initial_sync(&self, block: SignedBeaconBlock) -> anyhow::Result<()> {
        self.accept(block, ReceiveMode::InitialSync)
    }

    async fn receive_block(&self, block: SignedBeaconBlock) -> anyhow::Result<()> {
        self.accept(block, ReceiveMode::Direct)
    }
}

#[derive(Default)]
pub struct MockStorage {
    roots: Mutex<HashSet<Bytes32>>,
}

impl MockStorage {
    pub fn insert(&self, root: Bytes32) {
        self.roots.lock().insert(root);
    }
}

impl BlockStorage for MockStorage {
    fn has_block(&self, root: &Bytes32) -> bool {
        self.roots.lock().contains(root)
    }
}
