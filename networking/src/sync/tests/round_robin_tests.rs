use std::sync::Arc;
use std::time::{Duration, SystemTime};

use containers::{SECONDS_PER_SLOT, Slot, block_root};

use crate::sync::chain::ChainAccess;
use crate::sync::config::SyncConfig;
use crate::sync::error::SyncError;
use crate::sync::gate::ReceiveMode;
use crate::sync::round_robin::RoundRobinSync;
use crate::sync::tests::common::{
    MockChain, MockNetwork, MockPeers, MockStorage, PeerBehavior, build_chain,
};

fn genesis_slots_ago(slots: u64) -> SystemTime {
    SystemTime::now() - Duration::from_secs(slots * SECONDS_PER_SLOT)
}

#[tokio::test(start_paused = true)]
async fn test_two_phase_sync_reaches_wall_clock_head() {
    let blocks = build_chain(40);
    let network = Arc::new(MockNetwork::new(blocks.clone()));
    let peers = Arc::new(MockPeers::default());
    peers.add_peer(0, 40);
    peers.add_peer(0, 40);
    let chain = Arc::new(MockChain::new(0));
    let storage = Arc::new(MockStorage::default());
    storage.insert(block_root(&blocks[0].message));

    let mut sync = RoundRobinSync::new(network, peers, Arc::clone(&chain), storage, SyncConfig::default());
    sync.start(genesis_slots_ago(40)).await.unwrap();

    assert!(chain.head_slot() >= Slot(40));
    let received = chain.received();
    let slots: Vec<u64> = received.iter().map(|(slot, _)| slot.0).collect();
    assert_eq!(slots, (1..=40).collect::<Vec<u64>>());
    // Finalized epoch 0 puts the phase boundary at slot 32: everything up
    // to it arrives through the batched path, the rest through the regular
    // path.
    for (slot, mode) in received {
        let expected = if slot <= Slot(32) {
            ReceiveMode::InitialSync
        } else {
            ReceiveMode::Direct
        };
        assert_eq!(mode, expected, "wrong path at slot {slot}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_head_sync_empty_batch_exits_cleanly() {
    let blocks = build_chain(40);
    let network = Arc::new(MockNetwork::new(blocks.clone()));
    let peers = Arc::new(MockPeers::default());
    let peer = peers.add_peer(0, 35);
    network.set_behavior(
        peer,
        PeerBehavior {
            serve_limit: 35,
            ..Default::default()
        },
    );
    // Already past the finalized checkpoint, so only head sync runs.
    let chain = Arc::new(MockChain::new(32));
    let storage = Arc::new(MockStorage::default());
    storage.insert(block_root(&blocks[32].message));

    let mut sync = RoundRobinSync::new(network, peers, Arc::clone(&chain), storage, SyncConfig::default());
    sync.start(genesis_slots_ago(60)).await.unwrap();

    // The peer had nothing past slot 35; the phase ends without error and
    // leaves the rest to regular sync.
    assert_eq!(chain.head_slot(), Slot(35));
    assert!(
        chain
            .received()
            .iter()
            .all(|(_, mode)| *mode == ReceiveMode::Direct)
    );
}

#[tokio::test(start_paused = true)]
async fn test_head_sync_batch_failure_is_not_fatal() {
    let blocks = build_chain(40);
    let network = Arc::new(MockNetwork::new(blocks.clone()));
    let peers = Arc::new(MockPeers::default());
    let peer = peers.add_peer(0, 40);
    network.set_behavior(
        peer,
        PeerBehavior {
            fail_opens: u32::MAX,
            ..Default::default()
        },
    );
    let chain = Arc::new(MockChain::new(32));
    let storage = Arc::new(MockStorage::default());
    storage.insert(block_root(&blocks[32].message));

    let mut sync = RoundRobinSync::new(network, peers, Arc::clone(&chain), storage, SyncConfig::default());
    sync.start(genesis_slots_ago(60)).await.unwrap();
    assert_eq!(chain.head_slot(), Slot(32));
}

#[tokio::test(start_paused = true)]
async fn test_already_at_head_is_a_no_op() {
    let network = Arc::new(MockNetwork::new(Vec::new()));
    let peers = Arc::new(MockPeers::default());
    let chain = Arc::new(MockChain::new(40));
    let storage = Arc::new(MockStorage::default());

    let mut sync = RoundRobinSync::new(network, peers, Arc::clone(&chain), storage, SyncConfig::default());
    sync.start(genesis_slots_ago(40)).await.unwrap();
    assert!(chain.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_handle_cancels_sync() {
    let blocks = build_chain(320);
    let network = Arc::new(MockNetwork::new(blocks.clone()));
    let peers = Arc::new(MockPeers::default());
    let peer = peers.add_peer(9, 320);
    network.set_behavior(
        peer,
        PeerBehavior {
            open_delay: Duration::from_secs(3600),
            ..Default::default()
        },
    );
    let chain = Arc::new(MockChain::new(0));
    let storage = Arc::new(MockStorage::default());
    storage.insert(block_root(&blocks[0].message));

    let mut sync = RoundRobinSync::new(network, peers, chain, storage, SyncConfig::default());
    let stop = sync.stop_handle();
    let task = tokio::spawn(async move { sync.start(genesis_slots_ago(320)).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.stop();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(SyncError::Canceled)));
}
