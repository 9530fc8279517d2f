use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, ResourceTxn};

/// The one derivation rule for a resource's cached status.
///
/// A service window that is effective and covers `now` wins outright; otherwise
/// an approved reservation covering `now` makes the resource reserved.
pub fn derive_status(rs: &ResourceState, now: Ms) -> ResourceStatus {
    if rs.windows.iter().any(|w| w.occupies(now)) {
        ResourceStatus::UnderService
    } else if rs.reservations.iter().any(|r| r.occupies(now)) {
        ResourceStatus::Reserved
    } else {
        ResourceStatus::Available
    }
}

impl Engine {
    /// Re-derive the cached status of a locked resource, writing only on change.
    pub(super) async fn refresh_status(
        &self,
        txn: ResourceTxn,
        now: Ms,
    ) -> Result<(ResourceTxn, Option<ResourceStatus>), EngineError> {
        let derived = derive_status(&txn, now);
        if derived == txn.status {
            return Ok((txn, None));
        }
        let (id, old) = (txn.id, txn.status);
        let event = Event::ResourceStatusSet {
            id,
            status: derived,
        };
        let txn = self.commit(txn, event).await?;
        metrics::counter!(observability::RESOURCE_STATUS_CHANGES_TOTAL, "to" => derived.as_str())
            .increment(1);
        tracing::debug!("resource {id} {old} -> {derived}");
        self.publish(StatusChange::resource(id, old, derived, now));
        Ok((txn, Some(derived)))
    }

    /// Fast path after a committed lifecycle change, releasing the lock when
    /// done. A failure leaves the previous status for the next sweep to fix.
    pub(super) async fn refresh_after_change(&self, txn: ResourceTxn, now: Ms) {
        let id = txn.id;
        if let Err(e) = self.refresh_status(txn, now).await {
            tracing::warn!("status refresh for {id} deferred to next sweep: {e}");
        }
    }
}
