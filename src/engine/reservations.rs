use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{ensure_no_conflict, validate_reservation_span, validate_text, ConflictScope};
use super::{Engine, EngineError, ResourceTxn};

fn find_reservation(rs: &ResourceState, id: Ulid) -> Result<&Reservation, EngineError> {
    rs.reservation(id).ok_or(EngineError::NotFound(id))
}

fn illegal(r: &Reservation, to: ReservationStatus) -> EngineError {
    EngineError::InvalidTransition {
        id: r.id,
        from: r.status.as_str(),
        to: to.as_str(),
    }
}

impl Engine {
    /// Place a PENDING reservation. The conflict check and the insert happen
    /// under one write lock on the resource.
    pub async fn create_reservation(
        &self,
        resource_id: Ulid,
        span: Span,
        requester_id: Ulid,
        purpose: String,
    ) -> Result<Reservation, EngineError> {
        let now = self.now();
        validate_reservation_span(&span, now)?;
        validate_text(&purpose, MAX_PURPOSE_LEN, "purpose too long")?;

        let txn = self.store.begin(resource_id).await?;
        if txn.claim_count() >= MAX_CLAIMS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many claims on resource"));
        }
        ensure_no_conflict(&txn, &span.window(), ConflictScope::AllClaims, None)?;

        let reservation = Reservation {
            id: Ulid::new(),
            resource_id,
            span,
            requester_id,
            purpose,
            status: ReservationStatus::Pending,
            approver_id: None,
            created_at: now,
        };
        let event = Event::ReservationPlaced {
            reservation: reservation.clone(),
        };
        let _txn = self.commit(txn, event).await?;

        metrics::counter!(observability::CLAIMS_CREATED_TOTAL, "kind" => "reservation").increment(1);
        tracing::debug!("reservation {} placed on {resource_id}", reservation.id);
        self.publish(StatusChange::reservation(
            &reservation,
            None,
            Some(ReservationStatus::Pending),
            now,
        ));
        Ok(reservation)
    }

    /// PENDING → APPROVED, re-checked against claims that appeared since creation.
    pub async fn approve_reservation(
        &self,
        id: Ulid,
        approver_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let now = self.now();
        let txn = self.store.begin_for_claim(id).await?;
        let r = find_reservation(&txn, id)?;
        if r.status != ReservationStatus::Pending {
            return Err(illegal(r, ReservationStatus::Approved));
        }
        let window = r.span.window();
        ensure_no_conflict(&txn, &window, ConflictScope::AllClaims, Some(id))?;
        self.set_reservation_status(txn, id, ReservationStatus::Approved, Some(approver_id), now)
            .await
    }

    pub async fn reject_reservation(
        &self,
        id: Ulid,
        approver_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let now = self.now();
        let txn = self.store.begin_for_claim(id).await?;
        let r = find_reservation(&txn, id)?;
        if r.status != ReservationStatus::Pending {
            return Err(illegal(r, ReservationStatus::Rejected));
        }
        self.set_reservation_status(txn, id, ReservationStatus::Rejected, Some(approver_id), now)
            .await
    }

    /// Requester withdraws a reservation. Only PENDING ones can be withdrawn.
    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        requester_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let now = self.now();
        let txn = self.store.begin_for_claim(id).await?;
        let r = find_reservation(&txn, id)?;
        if r.requester_id != requester_id {
            return Err(EngineError::NotRequester { id, requester_id });
        }
        if r.status != ReservationStatus::Pending {
            return Err(illegal(r, ReservationStatus::Cancelled));
        }
        let approver_id = r.approver_id;
        self.set_reservation_status(txn, id, ReservationStatus::Cancelled, approver_id, now)
            .await
    }

    /// Administrative move to any status.
    ///
    /// Re-entering an active status, or entering APPROVED, goes through the
    /// conflict check like an approval. The admin is recorded as approver on
    /// APPROVED; leaving APPROVED clears the approver.
    pub async fn admin_set_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
        admin_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let now = self.now();
        let txn = self.store.begin_for_claim(id).await?;
        let r = find_reservation(&txn, id)?;
        let from = r.status;
        if from == status {
            return Ok(r.clone());
        }
        let window = r.span.window();
        let approver_id = match status {
            ReservationStatus::Approved => Some(admin_id),
            _ if from == ReservationStatus::Approved => None,
            _ => r.approver_id,
        };
        if status.is_active() && (!from.is_active() || status == ReservationStatus::Approved) {
            ensure_no_conflict(&txn, &window, ConflictScope::AllClaims, Some(id))?;
        }
        tracing::info!("admin {admin_id} moves reservation {id} {from} -> {status}");
        self.set_reservation_status(txn, id, status, approver_id, now)
            .await
    }

    /// Remove a reservation outright. The resource status is re-derived.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let now = self.now();
        let txn = self.store.begin_for_claim(id).await?;
        let removed = find_reservation(&txn, id)?.clone();
        let event = Event::ReservationRemoved {
            id,
            resource_id: removed.resource_id,
        };
        let txn = self.commit(txn, event).await?;
        self.publish(StatusChange::reservation(&removed, Some(removed.status), None, now));
        self.refresh_after_change(txn, now).await;
        Ok(removed)
    }

    /// Commit a status move on a locked resource, notify, and refresh the
    /// resource status for the move's immediate effect.
    async fn set_reservation_status(
        &self,
        txn: ResourceTxn,
        id: Ulid,
        status: ReservationStatus,
        approver_id: Option<Ulid>,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        let from = find_reservation(&txn, id)?.status;
        let event = Event::ReservationStatusSet {
            id,
            resource_id: txn.id,
            status,
            approver_id,
        };
        let txn = self.commit(txn, event).await?;
        let updated = find_reservation(&txn, id)?.clone();

        metrics::counter!(observability::TRANSITIONS_TOTAL, "kind" => "reservation", "to" => status.as_str())
            .increment(1);
        self.publish(StatusChange::reservation(&updated, Some(from), Some(status), now));
        self.refresh_after_change(txn, now).await;
        Ok(updated)
    }
}
