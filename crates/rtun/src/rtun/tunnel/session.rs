use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Mutex, mpsc, watch},
};

use crate::rtun::tunnel::error::TunnelError;

/// A bidirectional async byte stream.
///
/// Rust trait objects can only have a single non-auto "principal" trait, so we
/// wrap `AsyncRead + AsyncWrite` into a single trait.
pub trait AsyncStream: AsyncRead + AsyncWrite {}
impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + ?Sized {}

pub type BoxedStream = Box<dyn AsyncStream + Unpin + Send>;

/// Which side of the multiplexer this end plays.
///
/// This is fixed when the session is built and is deliberately not derived
/// from who dialed the control connection: the relay accepted the TCP
/// connection but is the one that opens streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens one stream per external connection (relay).
    Opener,
    /// Accepts streams opened by the peer (hidden side).
    Acceptor,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Opener => write!(f, "opener"),
            Role::Acceptor => write!(f, "acceptor"),
        }
    }
}

/// One-shot "session ended" notification.
///
/// `fire` flips the signal at most once; every waiter, including ones that
/// subscribe afterwards, observes it.
#[derive(Debug, Clone)]
pub struct ClosedSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ClosedSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true only for the call that actually closed the signal.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once fired.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for ClosedSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The contract the tunnel core needs from the stream multiplexer.
#[async_trait]
pub trait MuxSession: Send + Sync {
    fn role(&self) -> Role;
    async fn open_stream(&self) -> Result<BoxedStream, TunnelError>;
    async fn accept_stream(&self) -> Result<BoxedStream, TunnelError>;
    /// Resolves once the session has ended, for any reason.
    async fn closed(&self);
    async fn close(&self);
}

/// yamux session over one raw connection.
pub struct YamuxSession {
    role: Role,
    control: Mutex<tokio_yamux::Control>,
    incoming: Mutex<mpsc::Receiver<tokio_yamux::StreamHandle>>,
    closed: ClosedSignal,
    task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for YamuxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YamuxSession")
            .field("role", &self.role)
            .field("closed", &self.closed.is_fired())
            .finish_non_exhaustive()
    }
}

impl YamuxSession {
    pub fn new<T>(io: T, role: Role) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let cfg = tokio_yamux::Config::default();
        let mut session = match role {
            Role::Opener => tokio_yamux::Session::new_client(io, cfg),
            Role::Acceptor => tokio_yamux::Session::new_server(io, cfg),
        };
        let control = session.control();
        let closed = ClosedSignal::new();

        let (tx, rx) = mpsc::channel::<tokio_yamux::StreamHandle>(64);
        let driver_closed = closed.clone();
        let task = tokio::spawn(async move {
            while let Some(next) = session.next().await {
                match next {
                    Ok(st) => {
                        if role == Role::Opener {
                            // The hidden side never opens streams; drop strays.
                            tracing::debug!("tunnel: dropping peer-opened stream");
                            continue;
                        }
                        if tx.send(st).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(err=%err, "tunnel: session driver error");
                        break;
                    }
                }
            }
            driver_closed.fire();
        });

        Self {
            role,
            control: Mutex::new(control),
            incoming: Mutex::new(rx),
            closed,
            task,
        }
    }

    pub fn closed_signal(&self) -> ClosedSignal {
        self.closed.clone()
    }
}

#[async_trait]
impl MuxSession for YamuxSession {
    fn role(&self) -> Role {
        self.role
    }

    async fn open_stream(&self) -> Result<BoxedStream, TunnelError> {
        if self.closed.is_fired() {
            return Err(TunnelError::session("closed"));
        }
        let mut ctrl = self.control.lock().await;
        let st = ctrl.open_stream().await.map_err(TunnelError::session)?;
        Ok(Box::new(st))
    }

    async fn accept_stream(&self) -> Result<BoxedStream, TunnelError> {
        let mut rx = self.incoming.lock().await;
        let st = rx
            .recv()
            .await
            .ok_or_else(|| TunnelError::session("closed"))?;
        Ok(Box::new(st))
    }

    async fn closed(&self) {
        self.closed.wait().await;
    }

    async fn close(&self) {
        {
            let mut ctrl = self.control.lock().await;
            ctrl.close().await;
        }
        self.task.abort();
        self.closed.fire();
    }
}

impl Drop for YamuxSession {
    fn drop(&mut self) {
        // Dropping the driver drops the raw connection with it.
        self.task.abort();
        self.closed.fire();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn pair() -> (YamuxSession, YamuxSession) {
        let (a, b) = tokio::io::duplex(256 * 1024);
        (
            YamuxSession::new(a, Role::Opener),
            YamuxSession::new(b, Role::Acceptor),
        )
    }

    #[tokio::test]
    async fn closed_signal_fires_exactly_once() {
        let sig = ClosedSignal::new();
        assert!(!sig.is_fired());

        let waiter = {
            let sig = sig.clone();
            tokio::spawn(async move { sig.wait().await })
        };

        assert!(sig.fire());
        assert!(!sig.fire());
        assert!(!sig.clone().fire());
        assert!(sig.is_fired());

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();

        // Late subscribers see the fired state immediately.
        tokio::time::timeout(Duration::from_millis(100), sig.wait())
            .await
            .expect("late waiter");
    }

    #[tokio::test]
    async fn opener_streams_reach_acceptor() {
        let (opener, acceptor) = pair();
        assert_eq!(opener.role(), Role::Opener);
        assert_eq!(acceptor.role(), Role::Acceptor);

        let mut out = opener.open_stream().await.unwrap();
        out.write_all(b"hello").await.unwrap();
        out.flush().await.unwrap();

        let mut inc = tokio::time::timeout(Duration::from_secs(2), acceptor.accept_stream())
            .await
            .expect("accept")
            .unwrap();
        let mut buf = [0u8; 5];
        inc.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        inc.write_all(b"world").await.unwrap();
        inc.flush().await.unwrap();
        out.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn closing_one_end_unblocks_the_other() {
        let (opener, acceptor) = pair();
        let acceptor = Arc::new(acceptor);

        let accept = {
            let acceptor = acceptor.clone();
            tokio::spawn(async move { acceptor.accept_stream().await })
        };

        opener.close().await;
        tokio::time::timeout(Duration::from_millis(100), opener.closed())
            .await
            .expect("own close fires signal");
        assert!(opener.open_stream().await.is_err());

        let res = tokio::time::timeout(Duration::from_secs(2), accept)
            .await
            .expect("accept unblocked")
            .unwrap();
        assert!(res.is_err());

        tokio::time::timeout(Duration::from_secs(2), acceptor.closed())
            .await
            .expect("peer close fires signal");
    }

    #[tokio::test]
    async fn dropping_a_session_fires_its_signal() {
        let (opener, _acceptor) = pair();
        let sig = opener.closed_signal();
        drop(opener);
        assert!(sig.is_fired());
    }
}
