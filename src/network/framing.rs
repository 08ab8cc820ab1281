//! Length-Prefixed Framing
//!
//! A frame is a 4-byte big-endian length followed by that many bytes of
//! JSON. Oversized length prefixes are refused before allocating so a
//! malformed peer cannot make us buffer unbounded data.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::network::error::NetError;
use crate::network::protocol::Message;

/// Largest frame body accepted in either direction (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE });
    }
    let len = (body.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body.
///
/// A stream that closes before or inside a frame yields an `Io` error of
/// kind `UnexpectedEof`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge { size: len, max: MAX_FRAME_SIZE });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Encode and write one message.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let body = msg.to_bytes()?;
    #[cfg(feature = "debug-tracing")]
    tracing::trace!(kind = ?msg.kind, bytes = body.len(), "frame out");
    write_frame(writer, &body).await
}

/// Read and decode one message.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, NetError>
where
    R: AsyncRead + Unpin,
{
    let body = read_frame(reader).await?;
    let msg = Message::from_bytes(&body)?;
    #[cfg(feature = "debug-tracing")]
    tracing::trace!(kind = ?msg.kind, bytes = body.len(), "frame in");
    Ok(msg)
}
