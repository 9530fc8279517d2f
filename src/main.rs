use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use motorpool::config::Config;
use motorpool::engine::Engine;
use motorpool::notify::NotifyHub;
use motorpool::reconciler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    motorpool::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let hub = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), hub.clone())?);
    info!("motorpool started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  resources: {}", engine.store.resource_count());
    info!("  reconcile_interval: {:?}", config.reconcile_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Status-change log: every committed change, one JSON line each.
    let mut changes = hub.subscribe_all();
    let logger = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => match serde_json::to_string(&change) {
                    Ok(line) => info!(target: "motorpool::changes", "{line}"),
                    Err(e) => tracing::warn!("unserializable status change: {e}"),
                },
                Err(RecvError::Lagged(n)) => tracing::warn!("status-change log skipped {n} changes"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Catch up on anything that happened while we were down.
    let report = engine.reconcile(engine.now()).await;
    info!(
        "startup reconcile: {} windows started, {} completed, {} status changes",
        report.windows_started, report.windows_completed, report.status_changes
    );

    let reconcile_task = tokio::spawn(reconciler::run_reconciler(
        engine.clone(),
        config.reconcile_interval,
    ));
    let compact_task = tokio::spawn(reconciler::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");

    reconcile_task.abort();
    compact_task.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::error!("final compaction failed: {e}");
    }
    logger.abort();

    info!("motorpool stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = ctrl_c => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
