//! Length-prefixed single-message frames over a reliable byte stream.
//!
//! Each frame is a 4-byte big-endian length followed by one CBOR message.
//! Reads are full-length: a short read surfaces as an I/O error rather than
//! a partial frame.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::messages::{Message, MessageError};

/// Sanity cap on a single frame body.
pub const MAX_MESSAGE_SIZE: usize = 65_536;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("message of {size} bytes exceeds the maximum of {MAX_MESSAGE_SIZE}")]
    MessageTooLarge { size: usize },
    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

/// Reads one frame body. Fails with [`FramingError::MessageTooLarge`] before
/// reading a body whose declared length exceeds the cap.
pub async fn read_frame<S>(stream: &mut S) -> Result<Vec<u8>, FramingError>
where
    S: AsyncRead + Unpin,
{
    let mut length_prefix = [0u8; 4];
    stream.read_exact(&mut length_prefix).await?;

    let size = u32::from_be_bytes(length_prefix) as usize;
    if size > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge { size });
    }

    let mut body = vec![0u8; size];
    stream.read_exact(&mut body).await?;

    Ok(body)
}

/// Writes one frame: the length prefix, then the body.
pub async fn write_frame<S>(stream: &mut S, body: &[u8]) -> Result<(), FramingError>
where
    S: AsyncWrite + Unpin,
{
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge { size: body.len() });
    }

    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;

    Ok(())
}

/// Reads and decodes one message.
pub async fn read_message<S>(stream: &mut S) -> Result<Message, FramingError>
where
    S: AsyncRead + Unpin,
{
    let body = read_frame(stream).await?;
    Ok(Message::decode(&body)?)
}

/// Encodes and writes one message.
pub async fn write_message<S>(stream: &mut S, message: &Message) -> Result<(), FramingError>
where
    S: AsyncWrite + Unpin,
{
    let body = message.encode()?;
    write_frame(stream, &body).await
}
