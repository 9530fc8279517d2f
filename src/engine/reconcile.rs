use std::time::Instant;

use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::service::due_to_start;
use super::{Engine, EngineError};

/// What one resource's reconciliation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceReconcile {
    pub windows_started: usize,
    pub windows_completed: usize,
    pub status: ResourceStatus,
    pub status_changed: bool,
}

/// Totals for a full sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub resources: usize,
    pub windows_started: usize,
    pub windows_completed: usize,
    pub status_changes: usize,
    /// Resources whose reconciliation failed and kept their previous status.
    pub failed: Vec<Ulid>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.windows_started == 0
            && self.windows_completed == 0
            && self.status_changes == 0
            && self.failed.is_empty()
    }
}

impl Engine {
    /// Sweep every resource as of `now`: start due windows, complete elapsed
    /// ones, then re-derive the cached status. Each resource is its own unit
    /// of work, so an interrupted sweep leaves valid state behind.
    pub async fn reconcile(&self, now: Ms) -> ReconcileReport {
        let started = Instant::now();
        let mut report = ReconcileReport::default();

        for id in self.store.resource_ids() {
            match self.reconcile_resource(id, now).await {
                Ok(step) => {
                    report.resources += 1;
                    report.windows_started += step.windows_started;
                    report.windows_completed += step.windows_completed;
                    report.status_changes += usize::from(step.status_changed);
                }
                // Deleted since the id list was taken.
                Err(EngineError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!("reconcile of {id} failed, keeping previous status: {e}");
                    metrics::counter!(observability::RECONCILE_FAILURES_TOTAL).increment(1);
                    report.failed.push(id);
                }
            }
        }

        metrics::counter!(observability::RECONCILE_RUNS_TOTAL).increment(1);
        metrics::histogram!(observability::RECONCILE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        report
    }

    /// Reconcile a single resource under its write lock.
    pub async fn reconcile_resource(&self, id: Ulid, now: Ms) -> Result<ResourceReconcile, EngineError> {
        let mut txn = self.store.begin(id).await?;

        let due: Vec<Ulid> = txn
            .windows
            .iter()
            .filter(|w| due_to_start(w, now))
            .map(|w| w.id)
            .collect();
        for &wid in &due {
            txn = self
                .advance_service_window(txn, wid, ServiceStatus::InProgress, now)
                .await?
                .0;
            tracing::info!("service window {wid} on {id} started");
        }

        let elapsed: Vec<Ulid> = txn
            .windows
            .iter()
            .filter(|w| w.status == ServiceStatus::InProgress && w.window.end.is_some_and(|end| end <= now))
            .map(|w| w.id)
            .collect();
        for &wid in &elapsed {
            txn = self
                .advance_service_window(txn, wid, ServiceStatus::Completed, now)
                .await?
                .0;
            tracing::info!("service window {wid} on {id} completed");
        }

        let (txn, changed) = self.refresh_status(txn, now).await?;
        Ok(ResourceReconcile {
            windows_started: due.len(),
            windows_completed: elapsed.len(),
            status: txn.status,
            status_changed: changed.is_some(),
        })
    }

    /// Current status of a resource, reconciled as of the engine clock first.
    /// If reconciliation fails the cached value is returned as-is.
    pub async fn resource_status(&self, id: Ulid) -> Result<ResourceStatus, EngineError> {
        match self.reconcile_resource(id, self.now()).await {
            Ok(step) => Ok(step.status),
            Err(EngineError::NotFound(id)) => Err(EngineError::NotFound(id)),
            Err(e) => {
                tracing::warn!("serving cached status for {id}: {e}");
                let rs = self.store.get_resource(&id).ok_or(EngineError::NotFound(id))?;
                let status = rs.read().await.status;
                Ok(status)
            }
        }
    }
}
