use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::watch,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// Copies bytes both ways between `a` and `b` until either direction ends.
///
/// There is no half-close: end-of-stream or an error on one direction shuts
/// down the endpoint it was writing to and stops the other direction too.
/// Returns only after both directions have finished; both endpoints are
/// dropped (closed) on return.
pub async fn proxy<A, B>(a: A, b: B) -> ProxyStats
where
    A: AsyncRead + AsyncWrite + Send + Unpin,
    B: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (mut a_rd, mut a_wr) = tokio::io::split(a);
    let (mut b_rd, mut b_wr) = tokio::io::split(b);
    let (done_tx, done_rx) = watch::channel(false);

    let (a_to_b, b_to_a) = tokio::join!(
        pipe("a->b", &mut a_rd, &mut b_wr, &done_tx, done_rx.clone()),
        pipe("b->a", &mut b_rd, &mut a_wr, &done_tx, done_rx),
    );

    ProxyStats { a_to_b, b_to_a }
}

async fn pipe<R, W>(
    dir: &'static str,
    rd: &mut R,
    wr: &mut W,
    done: &watch::Sender<bool>,
    mut other_done: watch::Receiver<bool>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0u64;
    tokio::select! {
        res = copy_counted(rd, wr, &mut copied) => {
            if let Err(err) = res {
                tracing::debug!(dir, err=%err, "proxy: copy ended with error");
            }
        }
        _ = other_done.wait_for(|d| *d) => {}
    }
    done.send_replace(true);
    let _ = wr.shutdown().await;
    copied
}

async fn copy_counted<R, W>(rd: &mut R, wr: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut wr = Counted { inner: wr, copied };
    tokio::io::copy(rd, &mut wr).await.map(|_| ())
}

/// Counts bytes as they are written, so a copy that gets cancelled still
/// reports what it moved.
struct Counted<'a, W> {
    inner: &'a mut W,
    copied: &'a mut u64,
}

impl<W: AsyncWrite + Unpin> AsyncWrite for Counted<'_, W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut *this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = res {
            *this.copied += n as u64;
        }
        res
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}
