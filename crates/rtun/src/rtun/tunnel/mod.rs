//! Reverse TCP tunnel.
//!
//! The hidden side dials the relay, sends the port it wants exposed and then
//! turns the connection into a yamux session in which the *relay* opens one
//! stream per external connection and the hidden side accepts them.

pub mod backoff;
pub mod client;
pub mod dialer;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod mapping;
pub mod proxy;
pub mod relay;
pub mod session;


/// Resolves once the process-level shutdown flag is raised. If the sender is
/// gone nobody can raise it any more, so this never resolves.
pub async fn shutdown_requested(rx: &mut tokio::sync::watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
