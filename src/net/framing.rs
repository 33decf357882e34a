//! Length-prefixed message framing
//!
//! Reliable messages travel as `[u32 LE length][bincode payload]`. Inputs may
//! also arrive as single unframed datagrams.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::constants::net::{MAX_DATAGRAM_SIZE, MAX_MESSAGE_SIZE};
use crate::net::protocol::{decode, encode, DecodeError, EncodeError};

/// Errors that can occur during message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl FramingError {
    /// Whether the stream can still be read after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FramingError::Decode(_) | FramingError::Encode(_))
    }
}

fn map_eof(e: io::Error) -> FramingError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FramingError::ConnectionClosed
    } else {
        FramingError::Io(e)
    }
}

/// Read one raw frame payload
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, FramingError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(map_eof)?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }

    let mut buf = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut buf).await.map_err(map_eof)?;
    }
    Ok(buf)
}

/// Write one raw frame payload and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> Result<(), FramingError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(data.len(), MAX_MESSAGE_SIZE));
    }

    stream.write_all(&(data.len() as u32).to_le_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

/// Read and decode one framed message. The returned size is the payload length.
pub async fn read_message<R, T>(stream: &mut R) -> Result<(T, usize), FramingError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let payload = read_frame(stream).await?;
    let message = decode(&payload)?;
    Ok((message, payload.len()))
}

/// Encode and write one framed message; returns the payload length
pub async fn write_message<W, T>(stream: &mut W, message: &T) -> Result<usize, FramingError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = encode(message)?;
    write_frame(stream, &payload).await?;
    Ok(payload.len())
}

/// Decode a datagram (unreliable, unframed)
pub fn decode_datagram<T: DeserializeOwned>(data: &[u8]) -> Result<T, FramingError> {
    if data.len() > MAX_DATAGRAM_SIZE {
        return Err(FramingError::MessageTooLarge(data.len(), MAX_DATAGRAM_SIZE));
    }
    Ok(decode(data)?)
}
