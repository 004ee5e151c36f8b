use std::{net::SocketAddr, sync::Arc};

use tokio::{net::TcpListener, task::JoinSet};

use crate::rtun::tunnel::{
    error::TunnelError,
    proxy::{ProxyStats, proxy},
    session::MuxSession,
};

/// A port bound on the relay on behalf of exactly one session.
///
/// The listener is owned by `run` and dropped (closed) when it returns, which
/// happens as soon as the session ends or the session refuses a new stream.
pub struct PortBinding {
    port: u16,
    ln: TcpListener,
    sess: Arc<dyn MuxSession>,
}

impl std::fmt::Debug for PortBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortBinding")
            .field("port", &self.port)
            .field("local", &self.ln.local_addr().ok())
            .finish_non_exhaustive()
    }
}

impl PortBinding {
    pub async fn bind(
        host: &str,
        port: u16,
        sess: Arc<dyn MuxSession>,
    ) -> Result<Self, TunnelError> {
        let addr = format!("{host}:{port}");
        let ln = TcpListener::bind(&addr)
            .await
            .map_err(|source| TunnelError::ListenBind { addr, source })?;
        Ok(Self { port, ln, sess })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ln.local_addr().ok()
    }

    /// Bridges every external connection to a fresh stream until the session
    /// goes away. Always returns the reason the binding ended.
    pub async fn run(self) -> TunnelError {
        let PortBinding { port, ln, sess } = self;
        let local = ln.local_addr().ok();
        tracing::info!(port, local=?local, "relay: listening for external connections");

        let mut pairs: JoinSet<ProxyStats> = JoinSet::new();
        let reason = loop {
            tokio::select! {
                _ = sess.closed() => {
                    break TunnelError::session("closed");
                }
                res = ln.accept() => {
                    let (c, peer) = match res {
                        Ok(v) => v,
                        Err(err) => break TunnelError::Io(err),
                    };
                    let st = match sess.open_stream().await {
                        Ok(st) => st,
                        Err(err) => {
                            tracing::warn!(port, peer=%peer, err=%err, "relay: open stream failed");
                            break err;
                        }
                    };
                    tracing::debug!(port, peer=%peer, "relay: bridging external connection");
                    pairs.spawn(proxy(c, st));
                }
                Some(res) = pairs.join_next(), if !pairs.is_empty() => {
                    if let Ok(stats) = res {
                        tracing::debug!(port, sent=stats.a_to_b, received=stats.b_to_a, "proxy: pair closed");
                    }
                }
            }
        };

        drop(ln);
        tracing::info!(port, "relay: listener closed");
        reason
    }
}
