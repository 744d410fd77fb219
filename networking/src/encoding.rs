use serde::Serialize;
use serde::de::DeserializeOwned;
use snap::raw::{Decoder, Encoder};
use thiserror::Error;

/// Converts one logical message to the opaque payload bytes carried inside
/// a chunk, and back. The chunk framing around the payload is fixed; the
/// payload encoding is negotiated per protocol and pluggable.
pub trait PayloadEncoding<M>: Send + Sync {
    fn encode(&self, message: &M) -> Result<Vec<u8>, PayloadError>;
    fn decode(&self, bytes: &[u8]) -> Result<M, PayloadError>;
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload encoding failed: {0}")]
    Encode(String),
    #[error("payload decoding failed: {0}")]
    Decode(String),
}

/// Binary serde encoding wrapped in raw snappy compression, the default
/// payload encoding for block and range-request messages.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnappyPayload;

impl<M> PayloadEncoding<M> for SnappyPayload
where
    M: Serialize + DeserializeOwned,
{
    fn encode(&self, message: &M) -> Result<Vec<u8>, PayloadError> {
        let raw =
            bincode::serialize(message).map_err(|err| PayloadError::Encode(err.to_string()))?;
        let mut encoder = Encoder::new();
        encoder
            .compress_vec(&raw)
            .map_err(|err| PayloadError::Encode(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<M, PayloadError> {
        let mut decoder = Decoder::new();
        let raw = decoder
            .decompress_vec(bytes)
            .map_err(|err| PayloadError::Decode(err.to_string()))?;
        bincode::deserialize(&raw).map_err(|err| PayloadError::Decode(err.to_string()))
    }
}
