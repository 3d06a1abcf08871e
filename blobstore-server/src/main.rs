//! The blobstore front-end server binary.

use anyhow::Result;
use blobstore_server::config::Config;
use blobstore_server::observability::{initialize_tracing, maybe_initialize_metrics};
use blobstore_server::state::State;
use blobstore_server::web;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    let config = Config::from_env()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.worker_threads)
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    initialize_tracing(&config);
    tracing::info!("Starting service");
    tracing::debug!(?config);

    let metrics_guard = maybe_initialize_metrics(&config)?;

    runtime.block_on(async move {
        let state = State::new(config);
        let server_result = web::server(state).await;

        if let Some(metrics_guard) = metrics_guard {
            metrics_guard.flush(None).await?;
        }

        tracing::info!("shutting down");
        server_result
    })
}
