//! Network Module
//!
//! Carries election messages between nodes over TCP. Each frame is a
//! [`FrameHeader`] (length + CRC32) followed by the bincode-encoded message.

mod client;
mod server;

pub use client::TcpPeer;
pub use server::NetworkServer;

use crate::error::{Error, Result};
use crate::protocol::{FrameHeader, Message, MAX_FRAME_LEN};

/// Read a framed message from a reader
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > MAX_FRAME_LEN {
        return Err(Error::Network(format!(
            "Frame of {} bytes exceeds limit of {}",
            header.length, MAX_FRAME_LEN
        )));
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    if !header.verify(&body) {
        return Err(Error::Network("Message checksum mismatch".into()));
    }

    let message = Message::deserialize(&body)?;
    Ok(message)
}

/// Write a framed message to a writer
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = message.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}
