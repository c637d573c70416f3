use anyhow::Result;
use ingress_core::{
    start_watchers, BackoffLimiter, Config, EventRecorder, KeyExtractor, KubeEventRecorder,
    KubeVirtualServices, LogEventRecorder, SyncHandler, WorkQueue, WorkerPool,
};
use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CONTROLLER_NAME: &str = istio_api::MANAGED_BY_VALUE;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("INGRESS_ISTIO_LOG_FORMAT").is_ok_and(|f| f == "json");
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting {}...", CONTROLLER_NAME);

    let config = Arc::new(Config::from_env()?);
    info!("Configuration loaded");
    info!("  - Cluster domain: {}", config.cluster_domain);
    info!("  - Default gateway: {}", config.default_gateway);
    info!("  - Ingress class: {}", config.ingress_class);
    info!("  - Default weight: {}", config.default_weight);
    info!("  - Workers: {}", config.worker_count);

    let client = Client::try_default().await?;

    let recorder: Arc<dyn EventRecorder> = if std::env::var("INGRESS_ISTIO_DISABLE_EVENTS").is_ok() {
        Arc::new(LogEventRecorder)
    } else {
        Arc::new(KubeEventRecorder::new(
            client.clone(),
            CONTROLLER_NAME,
            std::env::var("POD_NAME").ok(),
        ))
    };

    let cancel = CancellationToken::new();
    let queue = WorkQueue::new(BackoffLimiter::new(config.backoff_base, config.backoff_max));
    let cache = Arc::new(start_watchers(
        client.clone(),
        KeyExtractor::new(queue.clone()),
        cancel.clone(),
    ));

    let handler = Arc::new(SyncHandler::new(
        config.clone(),
        cache.clone(),
        cache,
        Arc::new(KubeVirtualServices::new(client)),
        recorder,
    ));
    let pool = WorkerPool::new(queue, handler, config);

    let controller = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.run(cancel).await })
    };

    shutdown_signal().await?;
    info!("Shutdown signal received, draining workers...");
    cancel.cancel();

    match controller.await? {
        Ok(()) => info!("Controller stopped"),
        Err(e) => error!("Controller error: {}", e),
    }

    Ok(())
}

/// Resolve on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
