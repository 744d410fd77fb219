//! Initial block sync: fetch historical blocks from peers, order them, and
//! feed them through the admission gate into the chain.
//!
//! The pipeline runs in two phases. Phase one drives a multi-peer
//! [`queue::BlocksQueue`] up to the network's finalized checkpoint, where
//! concurrent fetches are safe because the target is agreed upon. Phase two
//! polls the single best peer for the non-finalized remainder until the
//! wall-clock head slot is reached.

pub mod chain;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod gate;
pub mod peers;
pub mod queue;
pub mod rate;
pub mod round_robin;

#[cfg(test)]
mod tests;

pub use chain::{BlockStorage, ChainAccess};
pub use config::{BlocksQueueConfig, StallPolicy, SyncConfig};
pub use error::SyncError;
pub use fetcher::{BlocksFetcher, SyncNetwork};
pub use gate::{AdmissionGate, ReceiveMode};
pub use peers::PeerDirectory;
pub use queue::{BlocksQueue, QueueState};
pub use rate::{DefaultThroughput, RateCounter, ThroughputStrategy};
pub use round_robin::{RoundRobinSync, StopHandle};
