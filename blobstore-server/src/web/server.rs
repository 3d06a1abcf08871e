//! Server bootstrap: listener setup, startup latch, and shutdown supervision.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal::unix::SignalKind;
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

use crate::config::Http;
use crate::state::ServiceState;
use crate::web::app::App;

/// Runs the blobstore HTTP server.
///
/// The listener is brought up in a background task; this function waits up to the
/// configured startup window for it to become ready, then supervises the server until
/// termination is requested. Startup failures surface the captured error.
pub async fn server(state: ServiceState) -> Result<()> {
    tracing::info!("Starting server");
    merni::counter!("server.start": 1);
    let startup_began = Instant::now();

    let startup_wait = Duration::from_secs(state.config.http.startup_wait_secs);
    let (ready, readiness) = oneshot::channel();
    let server_handle = tokio::spawn(serve(state, ready));

    match tokio::time::timeout(startup_wait, readiness).await {
        Ok(Ok(addr)) => {
            merni::distribution!("server.startup.duration"@s: startup_began.elapsed());
            tracing::info!("HTTP server listening on {addr}");
        }
        Ok(Err(_)) => {
            // The server task failed before signaling readiness; surface its error.
            merni::counter!("server.startup_error": 1);
            let error = match server_handle.await {
                Ok(Ok(())) => anyhow::anyhow!("server exited before becoming ready"),
                Ok(Err(error)) => error,
                Err(join_error) => anyhow::anyhow!(join_error),
            };
            return Err(error.context("failed to start HTTP server"));
        }
        Err(_) => {
            merni::counter!("server.startup_error": 1);
            server_handle.abort();
            anyhow::bail!("server startup timed out after {}s", startup_wait.as_secs());
        }
    }

    elegant_departure::tokio::depart()
        .on_termination()
        .on_sigint()
        .on_signal(SignalKind::hangup())
        .on_signal(SignalKind::quit())
        .await;

    let shutdown_began = Instant::now();
    let server_result = server_handle.await.map_err(From::from).flatten();
    merni::distribution!("server.shutdown.duration"@s: shutdown_began.elapsed());
    tracing::info!("Shutdown complete");

    server_result
}

async fn serve(state: ServiceState, ready: oneshot::Sender<SocketAddr>) -> Result<()> {
    let listener = listen(&state.config.http).context("failed to start TCP listener")?;
    let addr = listener.local_addr()?;

    // The supervisor may have given up waiting already; serve anyway.
    let _ = ready.send(addr);

    App::new(state).graceful_shutdown(true).serve(listener).await
}

fn listen(config: &Http) -> Result<TcpListener> {
    let addr = config.addr;
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;

    let listener = socket.listen(config.backlog)?;
    Ok(listener)
}
