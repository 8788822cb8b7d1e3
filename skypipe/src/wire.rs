//! Multipart message framing over a byte stream
//!
//! ```text
//! u32 BE  frame count
//! repeat:
//!   u32 BE  frame length
//!   bytes   frame
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::Message;

/// Default upper bound on the total size of one message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Upper bound on frames per message; the protocol never needs more than four
pub const MAX_FRAMES: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message has {0} frames, limit is {MAX_FRAMES}")]
    TooManyFrames(usize),

    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("connection closed in the middle of a message")]
    Truncated,
}

/// Read one message
///
/// Returns `Ok(None)` if the peer closed the stream cleanly between
/// messages.
///
/// # Errors
/// Fails on I/O errors, on a stream cut inside a message and on messages
/// breaking the limits.
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<Option<Message>, WireError>
where
    R: AsyncRead + Unpin,
{
    // EOF is clean only before the first byte of the count
    let mut count_buf = [0u8; 4];
    if reader.read(&mut count_buf[..1]).await? == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut count_buf[1..])
        .await
        .map_err(truncated)?;
    let count = u32::from_be_bytes(count_buf) as usize;
    if count > MAX_FRAMES {
        return Err(WireError::TooManyFrames(count));
    }

    let mut message = Vec::with_capacity(count);
    let mut total = 0usize;
    for _ in 0..count {
        let len = read_u32(reader).await? as usize;
        total = total.saturating_add(len);
        if total > max_size {
            return Err(WireError::MessageTooLarge {
                size: total,
                limit: max_size,
            });
        }
        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await.map_err(truncated)?;
        message.push(Bytes::from(frame));
    }
    Ok(Some(message))
}

/// Write one message and flush it
///
/// # Errors
/// Fails on I/O errors and on messages breaking the limits.
pub async fn write_message<W>(writer: &mut W, message: &[Bytes]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if message.len() > MAX_FRAMES {
        return Err(WireError::TooManyFrames(message.len()));
    }
    writer.write_all(&frame_len(message.len())?.to_be_bytes()).await?;
    for frame in message {
        writer.write_all(&frame_len(frame.len())?.to_be_bytes()).await?;
        writer.write_all(frame).await?;
    }
    writer.flush().await?;
    Ok(())
}

async fn read_u32<R>(reader: &mut R) -> Result<u32, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await.map_err(truncated)?;
    Ok(u32::from_be_bytes(buf))
}

fn frame_len(len: usize) -> Result<u32, WireError> {
    u32::try_from(len).map_err(|_| WireError::MessageTooLarge {
        size: len,
        limit: u32::MAX as usize,
    })
}

fn truncated(e: std::io::Error) -> WireError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WireError::Truncated
    } else {
        WireError::Io(e)
    }
}
