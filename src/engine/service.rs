use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{ensure_no_conflict, validate_service_window, validate_text, ConflictScope};
use super::{Engine, EngineError, ResourceTxn};

fn find_window(rs: &ResourceState, id: Ulid) -> Result<&ServiceWindow, EngineError> {
    rs.window(id).ok_or(EngineError::NotFound(id))
}

/// A window whose start has passed is in progress no matter what was asked for.
fn initial_status(window: &Window, requested: Option<ServiceStatus>, now: Ms) -> ServiceStatus {
    if window.start <= now {
        ServiceStatus::InProgress
    } else {
        requested.unwrap_or(ServiceStatus::Reported)
    }
}

/// A REPORTED window whose start is now at or before `now` must be promoted.
pub(super) fn due_to_start(w: &ServiceWindow, now: Ms) -> bool {
    w.status == ServiceStatus::Reported && w.window.start <= now
}

impl Engine {
    /// Open a maintenance window. It must not overlap an active reservation;
    /// other service windows may overlap it.
    pub async fn create_service_window(
        &self,
        resource_id: Ulid,
        window: Window,
        reporter_id: Ulid,
        description: String,
        requested_status: Option<ServiceStatus>,
    ) -> Result<ServiceWindow, EngineError> {
        let now = self.now();
        validate_service_window(&window)?;
        validate_text(&description, MAX_DESCRIPTION_LEN, "description too long")?;

        let txn = self.store.begin(resource_id).await?;
        if txn.claim_count() >= MAX_CLAIMS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many claims on resource"));
        }
        ensure_no_conflict(&txn, &window, ConflictScope::ReservationsOnly, None)?;

        let status = initial_status(&window, requested_status, now);
        let service = ServiceWindow {
            id: Ulid::new(),
            resource_id,
            window,
            reporter_id,
            description,
            status,
            created_at: now,
        };
        let event = Event::ServiceWindowOpened {
            window: service.clone(),
        };
        let txn = self.commit(txn, event).await?;

        metrics::counter!(observability::CLAIMS_CREATED_TOTAL, "kind" => "service_window").increment(1);
        tracing::debug!("service window {} opened on {resource_id} as {status}", service.id);
        self.publish(StatusChange::service_window(&service, None, Some(status), now));
        self.refresh_after_change(txn, now).await;
        Ok(service)
    }

    /// Move a window forward. Backward moves are refused; same status is a no-op.
    pub async fn set_service_window_status(
        &self,
        id: Ulid,
        status: ServiceStatus,
    ) -> Result<ServiceWindow, EngineError> {
        let now = self.now();
        let txn = self.store.begin_for_claim(id).await?;
        let w = find_window(&txn, id)?;
        if w.status == status {
            return Ok(w.clone());
        }
        if status < w.status {
            return Err(EngineError::InvalidTransition {
                id,
                from: w.status.as_str(),
                to: status.as_str(),
            });
        }
        let (txn, updated) = self.advance_service_window(txn, id, status, now).await?;
        self.refresh_after_change(txn, now).await;
        Ok(updated)
    }

    /// Change the interval or description of a window that has not completed.
    /// Moving a REPORTED window's start to or before now starts it, as on create.
    pub async fn update_service_window(
        &self,
        id: Ulid,
        window: Window,
        description: String,
    ) -> Result<ServiceWindow, EngineError> {
        let now = self.now();
        validate_service_window(&window)?;
        validate_text(&description, MAX_DESCRIPTION_LEN, "description too long")?;

        let txn = self.store.begin_for_claim(id).await?;
        let current = find_window(&txn, id)?;
        if !current.is_active() {
            return Err(EngineError::Validation("completed service windows cannot be edited"));
        }
        ensure_no_conflict(&txn, &window, ConflictScope::ReservationsOnly, Some(id))?;

        let event = Event::ServiceWindowEdited {
            id,
            resource_id: txn.id,
            window,
            description,
        };
        let txn = self.commit(txn, event).await?;
        let (txn, updated) = if due_to_start(find_window(&txn, id)?, now) {
            self.advance_service_window(txn, id, ServiceStatus::InProgress, now).await?
        } else {
            let updated = find_window(&txn, id)?.clone();
            (txn, updated)
        };
        self.refresh_after_change(txn, now).await;
        Ok(updated)
    }

    /// Remove a window. Before completion this acts as an early completion
    /// for resource status purposes.
    pub async fn delete_service_window(&self, id: Ulid) -> Result<ServiceWindow, EngineError> {
        let now = self.now();
        let txn = self.store.begin_for_claim(id).await?;
        let removed = find_window(&txn, id)?.clone();
        let event = Event::ServiceWindowRemoved {
            id,
            resource_id: removed.resource_id,
        };
        let txn = self.commit(txn, event).await?;
        self.publish(StatusChange::service_window(&removed, Some(removed.status), None, now));
        self.refresh_after_change(txn, now).await;
        Ok(removed)
    }

    /// Commit a forward move on a locked resource and hand the lock back.
    /// The caller refreshes the resource status afterwards.
    pub(super) async fn advance_service_window(
        &self,
        txn: ResourceTxn,
        id: Ulid,
        status: ServiceStatus,
        now: Ms,
    ) -> Result<(ResourceTxn, ServiceWindow), EngineError> {
        let from = find_window(&txn, id)?.status;
        let event = Event::ServiceWindowStatusSet {
            id,
            resource_id: txn.id,
            status,
        };
        let txn = self.commit(txn, event).await?;
        let updated = find_window(&txn, id)?.clone();

        metrics::counter!(observability::TRANSITIONS_TOTAL, "kind" => "service_window", "to" => status.as_str())
            .increment(1);
        self.publish(StatusChange::service_window(&updated, Some(from), Some(status), now));
        Ok((txn, updated))
    }
}
