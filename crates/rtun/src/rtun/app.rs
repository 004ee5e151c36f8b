use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::task::JoinSet;

use crate::rtun::{
    config::{self, Mode},
    logging, tunnel,
};

pub async fn run(overrides: config::Overrides) -> anyhow::Result<()> {
    let cfg = config::load(overrides)?;

    let logrt = logging::init(&cfg.logging)?;
    let _logrt_guard = logrt; // keep alive

    tracing::info!(
        mode = %cfg.mode,
        addr = %cfg.addr,
        mappings = cfg.mappings.len(),
        "rtun: starting"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut tasks = JoinSet::new();

    match cfg.mode {
        Mode::Relay => {
            if !cfg.mappings.is_empty() {
                tracing::warn!(mappings = cfg.mappings.len(), "rtun: port mappings are ignored in relay mode");
            }

            // Failing to bind the primary listen address is fatal.
            let relay = tunnel::relay::Relay::bind(tunnel::relay::RelayOptions {
                listen_addr: cfg.addr.clone(),
                expose_host: cfg.expose_host.clone(),
            })
            .await
            .with_context(|| format!("relay: listen {}", cfg.addr))?;

            let shutdown = shutdown_rx.clone();
            tasks.spawn(async move { relay.serve(shutdown).await });
        }
        Mode::Hidden => {
            for m in &cfg.mappings {
                let client = Arc::new(tunnel::client::Client::new(tunnel::client::ClientOptions {
                    server_addr: cfg.addr.clone(),
                    local_host: cfg.local_host.clone(),
                    mapping: *m,
                    retry_unit: cfg.retry_unit,
                }));
                tracing::info!(server = %cfg.addr, mapping = %client.mapping(), "client: starting supervisor");

                let shutdown = shutdown_rx.clone();
                tasks.spawn(async move { client.run(shutdown).await });
            }
        }
    }

    // Wait for shutdown signal (Ctrl-C / SIGTERM) or unexpected task termination.
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown: signal");
            let _ = shutdown_tx.send(true);
        }
        res = tasks.join_next() => {
            if let Some(res) = res {
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        let _ = shutdown_tx.send(true);
                        return Err(err);
                    }
                    Err(join_err) => return Err(join_err.into()),
                }
            }
        }
    }

    // Drain tasks: exit as soon as they complete; only enforce a timeout if something hangs.
    let drain = async { while tasks.join_next().await.is_some() {} };

    let drain_timeout = Duration::from_secs(5);
    if tokio::time::timeout(drain_timeout, drain).await.is_err() {
        tracing::warn!("shutdown: tasks did not stop in time; aborting");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }

    Ok(())
}

async fn shutdown_signal() {
    // Ctrl-C works cross-platform.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(err = %err, "shutdown: cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
