use alloy_primitives::FixedBytes;
use serde::{Deserialize, Serialize};

pub const SIGNATURE_SIZE: usize = 96;

/// Opaque fixed-size block signature.
///
/// Carried on the wire and handed to the receiver callback untouched;
/// verification happens behind that callback, never here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature(pub FixedBytes<SIGNATURE_SIZE>);

impl Signature {
    pub fn blank() -> Self {
        Self(Default::default())
    }
}

impl From<&[u8]> for Signature {
    fn from(value: &[u8]) -> Self {
        Self(FixedBytes::from_slice(value))
    }
}
