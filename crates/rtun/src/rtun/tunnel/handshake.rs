//! Control handshake: the only bytes this crate puts on the wire itself.
//!
//! Right after the control connection is established the hidden side sends a
//! single 4-byte big-endian unsigned integer naming the port it wants exposed.
//! Everything after those four bytes belongs to the multiplexer.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HANDSHAKE_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("port {0} out of range")]
    PortOutOfRange(u32),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn write_port<W: AsyncWrite + Unpin>(w: &mut W, port: u32) -> Result<(), HandshakeError> {
    w.write_u32(port).await?;
    w.flush().await?;
    Ok(())
}

/// Reads the raw port field. A short read surfaces as `Io(UnexpectedEof)`.
pub async fn read_port<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32, HandshakeError> {
    Ok(r.read_u32().await?)
}

/// Reads the port field and narrows it to something the relay can bind.
pub async fn read_bind_port<R: AsyncRead + Unpin>(r: &mut R) -> Result<u16, HandshakeError> {
    let port = read_port(r).await?;
    u16::try_from(port).map_err(|_| HandshakeError::PortOutOfRange(port))
}
