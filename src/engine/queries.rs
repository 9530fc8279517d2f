use std::cmp::Reverse;

use ulid::Ulid;

use crate::model::*;

use super::conflict::{self, ConflictScope};
use super::{Engine, EngineError, SharedResourceState};

impl Engine {
    fn resource(&self, id: Ulid) -> Result<SharedResourceState, EngineError> {
        self.store.get_resource(&id).ok_or(EngineError::NotFound(id))
    }

    /// Resources a filter can touch: one if it names a resource, else all.
    fn scoped_resources(&self, resource_id: Option<Ulid>) -> Vec<SharedResourceState> {
        match resource_id {
            Some(id) => self.store.get_resource(&id).into_iter().collect(),
            None => self
                .store
                .resource_ids()
                .into_iter()
                .filter_map(|id| self.store.get_resource(&id))
                .collect(),
        }
    }

    pub async fn get_resource(&self, id: Ulid) -> Result<ResourceInfo, EngineError> {
        let rs = self.resource(id)?;
        let guard = rs.read().await;
        Ok(ResourceInfo {
            id: guard.id,
            name: guard.name.clone(),
            status: guard.status,
        })
    }

    /// All resources in id order, with their cached status.
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut out = Vec::with_capacity(self.store.resource_count());
        for rs in self.scoped_resources(None) {
            let guard = rs.read().await;
            out.push(ResourceInfo {
                id: guard.id,
                name: guard.name.clone(),
                status: guard.status,
            });
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let resource_id = self.store.resource_for_claim(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self.resource(resource_id)?;
        let guard = rs.read().await;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Matching reservations, newest first.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let mut out = Vec::new();
        for rs in self.scoped_resources(filter.resource_id) {
            let guard = rs.read().await;
            out.extend(guard.reservations.iter().filter(|r| filter.matches(r)).cloned());
        }
        out.sort_by_key(|r| Reverse((r.created_at, r.id)));
        out
    }

    pub async fn get_service_window(&self, id: Ulid) -> Result<ServiceWindow, EngineError> {
        let resource_id = self.store.resource_for_claim(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self.resource(resource_id)?;
        let guard = rs.read().await;
        guard.window(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Matching service windows, latest start first.
    pub async fn list_service_windows(&self, filter: &ServiceWindowFilter) -> Vec<ServiceWindow> {
        let mut out = Vec::new();
        for rs in self.scoped_resources(filter.resource_id) {
            let guard = rs.read().await;
            out.extend(guard.windows.iter().filter(|w| filter.matches(w)).cloned());
        }
        out.sort_by_key(|w| Reverse((w.window.start, w.id)));
        out
    }

    /// Resources with no active claim overlapping `span`: the ones a new
    /// reservation for that span would be accepted on right now.
    pub async fn available_resources(&self, span: Span) -> Result<Vec<ResourceInfo>, EngineError> {
        if span.start >= span.end {
            return Err(EngineError::Validation("end must be after start"));
        }
        let window = span.window();
        let mut out = Vec::new();
        for rs in self.scoped_resources(None) {
            let guard = rs.read().await;
            if conflict::check_conflict(&guard, &window, ConflictScope::AllClaims, None).is_none() {
                out.push(ResourceInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    status: guard.status,
                });
            }
        }
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    /// Read-only conflict preview against every active claim on a resource.
    /// The answer can be stale by the time a write is attempted; writes run
    /// their own check under the resource lock.
    pub async fn check_conflict(
        &self,
        resource_id: Ulid,
        window: Window,
        exclude: Option<Ulid>,
    ) -> Result<Option<Conflict>, EngineError> {
        let rs = self.resource(resource_id)?;
        let guard = rs.read().await;
        Ok(conflict::check_conflict(&guard, &window, ConflictScope::AllClaims, exclude))
    }
}
