use std::error::Error;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use upscaler_service::config::Config;
use upscaler_service::download::HttpFetcher;
use upscaler_service::metric;
use upscaler_service::service::UpscaleService;
use upscaler_service::transform::Waifu2xTransformer;

use crate::endpoints;

/// Starts the upscale service and the HTTP server based on loaded config.
///
/// Blocks until the process receives `SIGINT` or `SIGTERM` and all pending work has been
/// resolved.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("manga-upscaler")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    runtime.block_on(serve(config))?;

    tracing::info!("System shutdown complete");
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();

    let fetcher = Arc::new(HttpFetcher::new(&config.download)?);
    let transformer = Arc::new(Waifu2xTransformer::new(config.upscaler.clone()));
    let bind = config.bind.clone();
    let (service, workers) = UpscaleService::create(config, fetcher, transformer, shutdown.clone())
        .context("failed to create upscale service")?;

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind to `{bind}`"))?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => tracing::info!("Received shutdown signal, shutting down"),
                Err(error) => tracing::error!(
                    error = &error as &dyn Error,
                    "Failed to wait for shutdown signal, shutting down"
                ),
            }
            shutdown.cancel();
        }
    });

    let result = axum::serve(listener, endpoints::create_app(service.clone()))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("HTTP server failed");

    // Also reached when the server fails on its own.
    shutdown.cancel();
    workers.join().await;
    // The cache directory goes away with the last handle.
    drop(service);

    result
}

/// Waits for `SIGINT`, or `SIGTERM` on Unix.
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
