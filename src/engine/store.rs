use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// A write guard on one resource. Holding it is the transaction: every read
/// and write of that resource's claims and cached status happens under it.
pub type ResourceTxn = OwnedRwLockWriteGuard<ResourceState>;

/// Claim storage: one lock per resource plus a claim → resource index.
pub struct ClaimStore {
    resources: DashMap<Ulid, SharedResourceState>,
    claim_to_resource: DashMap<Ulid, Ulid>,
}

impl Default for ClaimStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimStore {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            claim_to_resource: DashMap::new(),
        }
    }

    // ── Resources ────────────────────────────────────────────

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn contains_resource(&self, id: &Ulid) -> bool {
        self.resources.contains_key(id)
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn resource_ids(&self) -> Vec<Ulid> {
        self.resources.iter().map(|e| *e.key()).collect()
    }

    // ── Claim index ──────────────────────────────────────────

    pub fn resource_for_claim(&self, claim_id: &Ulid) -> Option<Ulid> {
        self.claim_to_resource.get(claim_id).map(|e| *e.value())
    }

    pub fn contains_claim(&self, claim_id: &Ulid) -> bool {
        self.claim_to_resource.contains_key(claim_id)
    }

    // ── Transactions ─────────────────────────────────────────

    /// Lock a resource for writing. Fails if the resource was deleted while
    /// waiting for the lock.
    pub async fn begin(&self, resource_id: Ulid) -> Result<ResourceTxn, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.clone().write_owned().await;
        match self.get_resource(&resource_id) {
            Some(current) if Arc::ptr_eq(&current, &rs) => Ok(guard),
            _ => Err(EngineError::NotFound(resource_id)),
        }
    }

    /// Lock the resource that owns a claim. The claim may have been removed
    /// while waiting for the lock, so callers must look it up again.
    pub async fn begin_for_claim(&self, claim_id: Ulid) -> Result<ResourceTxn, EngineError> {
        let resource_id = self
            .resource_for_claim(&claim_id)
            .ok_or(EngineError::NotFound(claim_id))?;
        self.begin(resource_id).await
    }

    // ── Event application ────────────────────────────────────

    /// Apply a resource create/delete. These touch the map, not a resource.
    pub fn apply_registry_event(&self, event: &Event) {
        match event {
            Event::ResourceCreated { id, name, status } => {
                let rs = ResourceState::new(*id, name.clone(), *status);
                self.resources.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::ResourceDeleted { id } => {
                self.resources.remove(id);
            }
            _ => {}
        }
    }

    /// Apply a claim or status event to a locked resource.
    pub fn apply_event(&self, rs: &mut ResourceState, event: &Event) {
        match event {
            Event::ResourceStatusSet { status, .. } => {
                rs.status = *status;
            }
            Event::ReservationPlaced { reservation } => {
                self.claim_to_resource.insert(reservation.id, reservation.resource_id);
                rs.insert_reservation(reservation.clone());
            }
            Event::ReservationStatusSet {
                id,
                status,
                approver_id,
                ..
            } => {
                if let Some(r) = rs.reservation_mut(*id) {
                    r.status = *status;
                    r.approver_id = *approver_id;
                }
            }
            Event::ReservationRemoved { id, .. } => {
                rs.remove_reservation(*id);
                self.claim_to_resource.remove(id);
            }
            Event::ServiceWindowOpened { window } => {
                self.claim_to_resource.insert(window.id, window.resource_id);
                rs.insert_window(window.clone());
            }
            Event::ServiceWindowEdited {
                id,
                window,
                description,
                ..
            } => {
                // Start may have moved; reinsert to keep the sort order.
                if let Some(mut w) = rs.remove_window(*id) {
                    w.window = *window;
                    w.description = description.clone();
                    rs.insert_window(w);
                }
            }
            Event::ServiceWindowStatusSet { id, status, .. } => {
                if let Some(w) = rs.window_mut(*id) {
                    w.status = *status;
                }
            }
            Event::ServiceWindowRemoved { id, .. } => {
                rs.remove_window(*id);
                self.claim_to_resource.remove(id);
            }
            Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => {}
        }
    }
}

/// The resource an event belongs to, for events applied under a resource lock.
pub(super) fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ResourceStatusSet { id, .. } => Some(*id),
        Event::ReservationPlaced { reservation } => Some(reservation.resource_id),
        Event::ServiceWindowOpened { window } => Some(window.resource_id),
        Event::ReservationStatusSet { resource_id, .. }
        | Event::ReservationRemoved { resource_id, .. }
        | Event::ServiceWindowEdited { resource_id, .. }
        | Event::ServiceWindowStatusSet { resource_id, .. }
        | Event::ServiceWindowRemoved { resource_id, .. } => Some(*resource_id),
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_build_and_tear_down_claims() {
        let store = ClaimStore::new();
        let rid = Ulid::new();
        store.apply_registry_event(&Event::ResourceCreated {
            id: rid,
            name: None,
            status: ResourceStatus::Available,
        });
        assert!(store.contains_resource(&rid));

        let reservation = Reservation {
            id: Ulid::new(),
            resource_id: rid,
            span: Span::new(10, 20),
            requester_id: Ulid::new(),
            purpose: "airport".into(),
            status: ReservationStatus::Pending,
            approver_id: None,
            created_at: 0,
        };
        let claim_id = reservation.id;
        let approver = Ulid::new();

        // Unknown until placed.
        assert!(store.begin_for_claim(claim_id).await.is_err());

        let mut guard = store.begin(rid).await.unwrap();
        store.apply_event(&mut guard, &Event::ReservationPlaced { reservation });
        store.apply_event(
            &mut guard,
            &Event::ReservationStatusSet {
                id: claim_id,
                resource_id: rid,
                status: ReservationStatus::Approved,
                approver_id: Some(approver),
            },
        );
        let r = guard.reservation(claim_id).unwrap();
        assert_eq!(r.status, ReservationStatus::Approved);
        assert_eq!(r.approver_id, Some(approver));
        assert_eq!(store.resource_for_claim(&claim_id), Some(rid));

        store.apply_event(&mut guard, &Event::ReservationRemoved { id: claim_id, resource_id: rid });
        assert!(guard.reservations.is_empty());
        assert!(!store.contains_claim(&claim_id));
    }

    #[tokio::test]
    async fn edited_window_is_resorted() {
        let store = ClaimStore::new();
        let rid = Ulid::new();
        store.apply_registry_event(&Event::ResourceCreated {
            id: rid,
            name: None,
            status: ResourceStatus::Available,
        });
        let mut guard = store.begin(rid).await.unwrap();
        let mut ids = Vec::new();
        for start in [100, 200] {
            let w = ServiceWindow {
                id: Ulid::new(),
                resource_id: rid,
                window: Window::bounded(start, start + 50),
                reporter_id: Ulid::new(),
                description: "tyres".into(),
                status: ServiceStatus::Reported,
                created_at: 0,
            };
            ids.push(w.id);
            store.apply_event(&mut guard, &Event::ServiceWindowOpened { window: w });
        }
        store.apply_event(
            &mut guard,
            &Event::ServiceWindowEdited {
                id: ids[0],
                resource_id: rid,
                window: Window::open(300),
                description: "tyres and brakes".into(),
            },
        );
        assert_eq!(guard.windows[0].id, ids[1]);
        assert_eq!(guard.windows[1].description, "tyres and brakes");
        assert!(guard.windows[1].window.is_open_ended());
    }

    #[tokio::test]
    async fn begin_unknown_is_not_found() {
        let store = ClaimStore::new();
        let missing = Ulid::new();
        assert!(matches!(store.begin(missing).await, Err(EngineError::NotFound(id)) if id == missing));
        assert!(matches!(store.begin_for_claim(missing).await, Err(EngineError::NotFound(_))));
    }
}
