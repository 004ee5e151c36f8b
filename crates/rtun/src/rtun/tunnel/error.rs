use thiserror::Error;

use crate::rtun::tunnel::handshake::HandshakeError;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("bind {addr}: {source}")]
    ListenBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("session: {0}")]
    Session(String),
    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    pub fn session(msg: impl std::fmt::Display) -> Self {
        TunnelError::Session(msg.to_string())
    }
}
