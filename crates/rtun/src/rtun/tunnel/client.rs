use std::{future::Future, io, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::watch,
};

use crate::rtun::net;
use crate::rtun::tunnel::{
    backoff::Backoff,
    dialer,
    error::TunnelError,
    handshake,
    mapping::TunnelMapping,
    session::{MuxSession, Role, YamuxSession},
    shutdown_requested,
};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server_addr: String,
    pub local_host: String,
    pub mapping: TunnelMapping,
    /// One backoff/cool-down unit; 1s outside of tests.
    pub retry_unit: Duration,
}

/// Hidden side supervisor for one mapping: keeps a control connection to the
/// relay alive and serves the relay's streams from the local service.
#[derive(Debug)]
pub struct Client {
    opts: ClientOptions,
    server_addr: String,
    local_addr: String,
}

impl Client {
    pub fn new(mut opts: ClientOptions) -> Self {
        if opts.retry_unit.is_zero() {
            opts.retry_unit = Duration::from_secs(1);
        }
        let server_addr = net::normalize_dial_addr(&opts.server_addr).into_owned();
        let local_addr = format!("{}:{}", opts.local_host.trim(), opts.mapping.local_port);
        Self {
            opts,
            server_addr,
            local_addr,
        }
    }

    pub fn mapping(&self) -> TunnelMapping {
        self.opts.mapping
    }

    /// Runs connect/serve cycles until shutdown. Every cycle starts from a
    /// fresh dial, a fresh backoff and a fresh session.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.run_with(|| TcpStream::connect(self.server_addr.as_str()), shutdown)
            .await
    }

    async fn run_with<F, Fut, T>(&self, mut dial: F, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return Ok(()),
                err = self.run_once(&mut dial) => {
                    tracing::warn!(
                        server=%self.server_addr,
                        mapping=%self.opts.mapping,
                        err=%err,
                        cooldown=%humantime::format_duration(self.opts.retry_unit),
                        "client: session ended; reconnecting"
                    );
                }
            }

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return Ok(()),
                _ = tokio::time::sleep(self.opts.retry_unit) => {}
            }
        }
    }

    async fn run_once<F, Fut, T>(&self, dial: &mut F) -> TunnelError
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut backoff = Backoff::for_reconnect(self.opts.retry_unit);
        let mut c = dial_with_backoff(dial, &mut backoff, &self.server_addr).await;

        let remote_port = self.opts.mapping.remote_port;
        if let Err(err) = handshake::write_port(&mut c, u32::from(remote_port)).await {
            return err.into();
        }

        let sess = Arc::new(YamuxSession::new(c, Role::Acceptor));
        tracing::info!(
            server=%self.server_addr,
            local=%self.local_addr,
            remote_port,
            role=%sess.role(),
            "client: connected"
        );

        let reason = dialer::serve_streams(sess.clone(), &self.local_addr).await;
        sess.close().await;
        reason
    }
}

/// Dials until it succeeds, sleeping `backoff.next_delay()` after each failure.
pub async fn dial_with_backoff<F, Fut, T>(mut dial: F, backoff: &mut Backoff, target: &str) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match dial().await {
            Ok(c) => return c,
            Err(err) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    server=%target,
                    err=%err,
                    backoff=%humantime::format_duration(delay),
                    "client: dial failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
