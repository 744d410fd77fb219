//! Chunked response framing over a byte stream.
//!
//! Every logical message travels as one chunk:
//!
//! `response_chunk ::= <status: 1 byte> <length: unsigned varint> <payload>`
//!
//! Status `0x00` marks success and the payload is a message encoding; any
//! other status marks failure and the payload is a UTF-8 error string. The
//! maximum payload length is enforced on both the write and the read path,
//! before the payload is read, so a malicious peer cannot force unbounded
//! allocation. This framing is the compatibility boundary between
//! implementations; the bytes must match exactly.

use std::io;
use std::time::Duration;

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use thiserror::Error;
use tokio::time::timeout;

use crate::encoding::{PayloadEncoding, PayloadError};

/// Upper bound on a single chunk payload.
pub const MAX_CHUNK_SIZE: usize = 1 << 20;

/// Deadline for reading one chunk from a stream.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for writing one chunk to a stream.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Status byte of a successful chunk.
pub const RESPONSE_CODE_SUCCESS: u8 = 0x00;

/// Status byte a responder uses for a generic server-side failure.
pub const RESPONSE_CODE_SERVER_ERROR: u8 = 0x02;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("stream i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("chunk deadline exceeded")]
    Timeout,
    #[error("chunk of {size} bytes exceeds maximum of {max}")]
    EncodingTooLarge { size: usize, max: usize },
    #[error("malformed chunk payload: {0}")]
    MalformedPayload(String),
    #[error("peer reported error: {0}")]
    PeerReported(String),
}

impl From<PayloadError> for ChunkError {
    fn from(err: PayloadError) -> Self {
        ChunkError::MalformedPayload(err.to_string())
    }
}

/// Write `message` as a single success chunk.
pub async fn write_chunk<S, E, M>(
    stream: &mut S,
    encoding: &E,
    message: &M,
) -> Result<(), ChunkError>
where
    S: AsyncWrite + Unpin + Send,
    E: PayloadEncoding<M>,
{
    let payload = encoding.encode(message)?;
    write_frame(stream, RESPONSE_CODE_SUCCESS, &payload).await
}

/// Write a failure chunk. `code` must be nonzero; the payload is the raw
/// UTF-8 error text.
pub async fn write_error_chunk<S>(stream: &mut S, code: u8, message: &str) -> Result<(), ChunkError>
where
    S: AsyncWrite + Unpin + Send,
{
    debug_assert_ne!(code, RESPONSE_CODE_SUCCESS);
    write_frame(stream, code, message.as_bytes()).await
}

/// Read one chunk and decode it as `M`.
///
/// `Ok(None)` means the stream was closed cleanly before a status byte:
/// the peer has nothing further to send. A nonzero status surfaces as
/// `PeerReported` carrying the peer's error text.
pub async fn read_chunk<S, E, M>(stream: &mut S, encoding: &E) -> Result<Option<M>, ChunkError>
where
    S: AsyncRead + Unpin + Send,
    E: PayloadEncoding<M>,
{
    let frame = timeout(READ_TIMEOUT, read_frame(stream))
        .await
        .map_err(|_| ChunkError::Timeout)??;

    match frame {
        None => Ok(None),
        Some((RESPONSE_CODE_SUCCESS, payload)) => {
            let message = encoding.decode(&payload)?;
            Ok(Some(message))
        }
        Some((_, payload)) => {
            let text = String::from_utf8_lossy(&payload).into_owned();
            Err(ChunkError::PeerReported(text))
        }
    }
}

async fn write_frame<S>(stream: &mut S, status: u8, payload: &[u8]) -> Result<(), ChunkError>
where
    S: AsyncWrite + Unpin + Send,
{
    if payload.len() > MAX_CHUNK_SIZE {
        return Err(ChunkError::EncodingTooLarge {
            size: payload.len(),
            max: MAX_CHUNK_SIZE,
        });
    }
    let mut buffer = unsigned_varint::encode::usize_buffer();
    let length = unsigned_varint::encode::usize(payload.len(), &mut buffer);

    let write = async {
        stream.write_all(&[status]).await?;
        stream.write_all(length).await?;
        stream.write_all(payload).await?;
        stream.flush().await
    };
    timeout(WRITE_TIMEOUT, write)
        .await
        .map_err(|_| ChunkError::Timeout)?
        .map_err(ChunkError::from)
}

async fn read_frame<S>(stream: &mut S) -> Result<Option<(u8, Vec<u8>)>, ChunkError>
where
    S: AsyncRead + Unpin + Send,
{
    let mut status = [0u8; 1];
    if stream.read(&mut status).await? == 0 {
        return Ok(None);
    }

    let length = read_varint(stream).await?;
    if length > MAX_CHUNK_SIZE {
        return Err(ChunkError::EncodingTooLarge {
            size: length,
            max: MAX_CHUNK_SIZE,
        });
    }
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await?;
    Ok(Some((status[0], payload)))
}

/// Read an unsigned varint length prefix one byte at a time, so no bytes
/// past the prefix are consumed.
async fn read_varint<S>(stream: &mut S) -> Result<usize, ChunkError>
where
    S: AsyncRead + Unpin + Send,
{
    let mut buffer = unsigned_varint::encode::usize_buffer();
    for index in 0..buffer.len() {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await?;
        buffer[index] = byte[0];
        if byte[0] & 0x80 == 0 {
            let (value, _) = unsigned_varint::decode::usize(&buffer[..=index])
                .map_err(|err| ChunkError::MalformedPayload(format!("bad length prefix: {err}")))?;
            return Ok(value);
        }
    }
    Err(ChunkError::MalformedPayload(
        "length prefix too long".to_string(),
    ))
}
