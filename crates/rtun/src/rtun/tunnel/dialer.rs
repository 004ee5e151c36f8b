use std::sync::Arc;

use tokio::{io::AsyncWriteExt, net::TcpStream, task::JoinSet};

use crate::rtun::tunnel::{
    error::TunnelError,
    proxy::{ProxyStats, proxy},
    session::MuxSession,
};

/// Hidden side: bridges every stream the relay opens to a fresh connection to
/// `local_addr`.
///
/// Dials happen inline, one stream at a time, so local connections are made
/// in the order the streams arrived. A failed dial closes only that stream.
/// Returns when the session stops handing out streams.
pub async fn serve_streams(sess: Arc<dyn MuxSession>, local_addr: &str) -> TunnelError {
    let mut pairs: JoinSet<ProxyStats> = JoinSet::new();
    loop {
        tokio::select! {
            res = sess.accept_stream() => {
                let mut st = match res {
                    Ok(st) => st,
                    Err(err) => return err,
                };
                match TcpStream::connect(local_addr).await {
                    Ok(up) => {
                        tracing::debug!(local=%local_addr, "tunnel: bridging stream to local service");
                        pairs.spawn(proxy(st, up));
                    }
                    Err(source) => {
                        let err = TunnelError::Dial { addr: local_addr.to_string(), source };
                        tracing::warn!(err=%err, "tunnel: local dial failed; dropping stream");
                        let _ = st.shutdown().await;
                    }
                }
            }
            Some(res) = pairs.join_next(), if !pairs.is_empty() => {
                if let Ok(stats) = res {
                    tracing::debug!(local=%local_addr, sent=stats.b_to_a, received=stats.a_to_b, "proxy: pair closed");
                }
            }
        }
    }
}
