use std::{net::SocketAddr, sync::Arc};

use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};

use crate::rtun::net;
use crate::rtun::tunnel::{
    error::TunnelError,
    handshake,
    listener::PortBinding,
    session::{MuxSession, Role, YamuxSession},
    shutdown_requested,
};

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub listen_addr: String,
    /// Host negotiated ports are bound on.
    pub expose_host: String,
}

/// Publicly reachable side: accepts control connections and exposes the port
/// each one asks for.
pub struct Relay {
    opts: RelayOptions,
    ln: TcpListener,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("opts", &self.opts)
            .field("local", &self.local_addr())
            .finish()
    }
}

impl Relay {
    pub async fn bind(opts: RelayOptions) -> Result<Self, TunnelError> {
        let addr = net::normalize_bind_addr(&opts.listen_addr).into_owned();
        let ln = TcpListener::bind(&addr)
            .await
            .map_err(|source| TunnelError::ListenBind { addr, source })?;
        Ok(Self { opts, ln })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ln.local_addr().ok()
    }

    pub async fn serve(self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
        tracing::info!(
            addr = %self.opts.listen_addr,
            local = ?self.local_addr(),
            "relay: listening for control connections"
        );

        let expose_host = net::normalize_bind_host(&self.opts.expose_host).into_owned();
        let mut conns: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                res = self.ln.accept() => {
                    match res {
                        Ok((c, peer)) => {
                            conns.spawn(serve_control_conn(c, peer, expose_host.clone()));
                        }
                        Err(err) => {
                            tracing::warn!(err=%err, "relay: accept control connection failed");
                        }
                    }
                }
                Some(_) = conns.join_next(), if !conns.is_empty() => {}
            }
        }

        // Dropping the set aborts every control connection and its binding.
        conns.shutdown().await;
        Ok(())
    }
}

/// Runs one control connection from handshake to teardown. Nothing outlives
/// the call: the session, the bound port and all bridged pairs end with it.
pub async fn serve_control_conn(mut c: TcpStream, peer: SocketAddr, expose_host: String) {
    let port = match handshake::read_bind_port(&mut c).await {
        Ok(p) => p,
        Err(err) => {
            tracing::warn!(peer=%peer, err=%err, "relay: handshake failed");
            return;
        }
    };
    tracing::info!(peer=%peer, port, "relay: accepted control connection");

    let sess: Arc<dyn MuxSession> = Arc::new(YamuxSession::new(c, Role::Opener));
    tracing::debug!(peer=%peer, port, role=%sess.role(), "relay: session started");

    let binding = match PortBinding::bind(&expose_host, port, sess.clone()).await {
        Ok(b) => b,
        Err(err) => {
            tracing::warn!(peer=%peer, port, err=%err, "relay: cannot expose port");
            sess.close().await;
            return;
        }
    };

    let reason = binding.run().await;
    sess.close().await;
    tracing::info!(peer=%peer, port, reason=%reason, "relay: control connection ended");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn start_relay() -> (SocketAddr, tokio::sync::watch::Sender<bool>, tokio::task::JoinHandle<anyhow::Result<()>>) {
        let relay = Relay::bind(RelayOptions {
            listen_addr: "127.0.0.1:0".into(),
            expose_host: "127.0.0.1".into(),
        })
        .await
        .unwrap();
        let addr = relay.local_addr().unwrap();
        let (tx, rx) = tokio::sync::watch::channel(false);
        let task = tokio::spawn(relay.serve(rx));
        (addr, tx, task)
    }

    async fn free_port() -> u16 {
        let ln = TcpListener::bind("127.0.0.1:0").await.unwrap();
        ln.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn short_handshake_drops_only_that_connection() {
        let (addr, shutdown, task) = start_relay().await;

        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(&[0x00, 0x01]).await.unwrap();
        bad.shutdown().await.unwrap();
        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), bad.read_to_end(&mut buf))
            .await
            .expect("relay closed bad control connection")
            .unwrap();

        let mut huge = TcpStream::connect(addr).await.unwrap();
        huge.write_u32(1 << 20).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), huge.read_to_end(&mut buf))
            .await
            .expect("relay closed out-of-range control connection")
            .unwrap();

        // The relay still serves good control connections.
        let port = free_port().await;
        let mut good = TcpStream::connect(addr).await.unwrap();
        handshake::write_port(&mut good, port as u32).await.unwrap();
        let hidden = YamuxSession::new(good, Role::Acceptor);

        let mut external = None;
        for _ in 0..100 {
            if let Ok(c) = TcpStream::connect(("127.0.0.1", port)).await {
                external = Some(c);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut external = external.expect("negotiated port exposed");
        external.write_all(b"hi").await.unwrap();

        let mut st = tokio::time::timeout(Duration::from_secs(2), hidden.accept_stream())
            .await
            .expect("stream opened toward hidden side")
            .unwrap();
        let mut buf = [0u8; 2];
        st.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("relay stopped")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn unbindable_port_closes_control_connection() {
        let (addr, _shutdown, _task) = start_relay().await;
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut c = TcpStream::connect(addr).await.unwrap();
        handshake::write_port(&mut c, port as u32).await.unwrap();
        let hidden = YamuxSession::new(c, Role::Acceptor);

        tokio::time::timeout(Duration::from_secs(2), hidden.closed())
            .await
            .expect("session torn down after bind failure");
        assert!(hidden.accept_stream().await.is_err());
    }
}
