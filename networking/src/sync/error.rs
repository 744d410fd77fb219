use containers::{Bytes32, Slot};
use thiserror::Error;

use crate::codec::ChunkError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request timed out")]
    RequestTimeout,
    #[error("peer reported error: {0}")]
    PeerReported(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("slot {slot} does not advance watermark {watermark}")]
    SlotNotMonotonic { slot: Slot, watermark: Slot },
    #[error("block at slot {slot} has unknown parent {parent_root}")]
    OrphanBlock { slot: Slot, parent_root: Bytes32 },
    #[error("no suitable peer available")]
    NoSuitablePeer,
    #[error("sub-range at slot {start_slot} stalled after {attempts} attempts")]
    Stall { start_slot: Slot, attempts: u32 },
    #[error("sync canceled")]
    Canceled,
    #[error("block rejected by chain")]
    Rejected(#[source] anyhow::Error),
    #[error("sync already started")]
    AlreadyStarted,
}

impl SyncError {
    /// Whether the failed operation is worth retrying against another peer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connection(_)
                | SyncError::RequestTimeout
                | SyncError::PeerReported(_)
                | SyncError::InvalidPayload(_)
                | SyncError::NoSuitablePeer
        )
    }
}

impl From<ChunkError> for SyncError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Io(inner) => SyncError::Connection(inner.to_string()),
            ChunkError::Timeout => SyncError::RequestTimeout,
            ChunkError::EncodingTooLarge { size, max } => {
                SyncError::InvalidPayload(format!("chunk of {size} bytes exceeds maximum of {max}"))
            }
            ChunkError::MalformedPayload(text) => SyncError::InvalidPayload(text),
            ChunkError::PeerReported(text) => SyncError::PeerReported(text),
        }
    }
}
