use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::engine::Engine;

/// Background task that periodically reconciles every resource at the
/// engine's current time.
pub async fn run_reconciler(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let report = engine.reconcile(engine.now()).await;
        if !report.is_noop() {
            info!(
                "reconciled {} resources: {} windows started, {} completed, {} status changes, {} failed",
                report.resources,
                report.windows_started,
                report.windows_completed,
                report.status_changes,
                report.failed.len()
            );
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}
