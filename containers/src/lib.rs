pub mod block;
pub mod checkpoint;
pub mod config;
pub mod request;
pub mod signature;
pub mod slot;
pub mod status;
pub mod types;

pub use block::{block_root, BeaconBlock, BlockBody, SignedBeaconBlock};
pub use checkpoint::Checkpoint;
pub use config::{SECONDS_PER_SLOT, SLOTS_PER_EPOCH};
pub use request::BlocksByRangeRequest;
pub use signature::Signature;
pub use slot::{Epoch, Slot};
pub use status::Status;
pub use types::{Bytes32, ValidatorIndex};
