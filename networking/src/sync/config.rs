use std::sync::Arc;
use std::time::Duration;

use containers::Slot;

use crate::sync::rate::{DefaultThroughput, ThroughputStrategy};

/// Blocks requested per range request before rate tuning kicks in, and the
/// ceiling the tuner never exceeds.
pub const DEFAULT_BLOCKS_PER_REQUEST: u64 = 64;

/// Sub-ranges fetched concurrently by the queue.
pub const MAX_CONCURRENT_FETCHES: usize = 8;

/// Attempts per sub-range before the stall policy applies.
pub const MAX_SUBRANGE_RETRIES: u32 = 5;

/// How long to wait for new peers when none are usable.
pub const PEER_REFRESH_INTERVAL: Duration = Duration::from_secs(6);

/// Sliding window of the throughput counter.
pub const COUNTER_WINDOW: Duration = Duration::from_secs(20);

/// Assumed one-way latency to a peer, used to size requests.
pub const DEFAULT_HALF_RTT: Duration = Duration::from_millis(500);

/// What the queue does with a sub-range that exhausts its retries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StallPolicy {
    /// Log the gap and keep emitting later sub-ranges. Blocks past the gap
    /// will fail parent-linkage at the admission gate until the gap heals.
    #[default]
    Skip,
    /// Record a fatal stall and shut the queue down.
    Abort,
}

/// Parameters for one queue run over a fixed slot range.
#[derive(Clone, Debug)]
pub struct BlocksQueueConfig {
    /// First slot to fetch, inclusive.
    pub start_slot: Slot,
    /// Last slot to fetch, inclusive.
    pub highest_expected_slot: Slot,
    /// Slots per sub-range handed to a fetch task.
    pub batch_size: u64,
    pub max_concurrent_fetches: usize,
    pub max_retries: u32,
    pub stall_policy: StallPolicy,
}

impl BlocksQueueConfig {
    pub fn new(start_slot: Slot, highest_expected_slot: Slot) -> Self {
        Self {
            start_slot,
            highest_expected_slot,
            batch_size: DEFAULT_BLOCKS_PER_REQUEST,
            max_concurrent_fetches: MAX_CONCURRENT_FETCHES,
            max_retries: MAX_SUBRANGE_RETRIES,
            stall_policy: StallPolicy::default(),
        }
    }
}

/// Tunables shared by the whole sync pipeline.
#[derive(Clone)]
pub struct SyncConfig {
    pub batch_size: u64,
    pub max_concurrent_fetches: usize,
    pub max_retries: u32,
    pub stall_policy: StallPolicy,
    pub peer_refresh_interval: Duration,
    pub half_rtt: Duration,
    pub throughput: Arc<dyn ThroughputStrategy>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BLOCKS_PER_REQUEST,
            max_concurrent_fetches: MAX_CONCURRENT_FETCHES,
            max_retries: MAX_SUBRANGE_RETRIES,
            stall_policy: StallPolicy::default(),
            peer_refresh_interval: PEER_REFRESH_INTERVAL,
            half_rtt: DEFAULT_HALF_RTT,
            throughput: Arc::new(DefaultThroughput::default()),
        }
    }
}

impl SyncConfig {
    pub fn queue_config(&self, start_slot: Slot, highest_expected_slot: Slot) -> BlocksQueueConfig {
        BlocksQueueConfig {
            start_slot,
            highest_expected_slot,
            batch_size: self.batch_size,
            max_concurrent_fetches: self.max_concurrent_fetches,
            max_retries: self.max_retries,
            stall_policy: self.stall_policy,
        }
    }
}
