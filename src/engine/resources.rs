use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

impl Engine {
    /// Register a resource. It starts AVAILABLE with no claims.
    pub async fn create_resource(&self, id: Ulid, name: Option<String>) -> Result<ResourceInfo, EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }

        let registry = self.registry.clone().lock_owned().await;
        if self.store.resource_count() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if self.store.contains_resource(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let status = ResourceStatus::Available;
        let event = Event::ResourceCreated {
            id,
            name: name.clone(),
            status,
        };
        self.commit_registry(registry, event).await?;

        metrics::gauge!(observability::RESOURCES_REGISTERED).set(self.store.resource_count() as f64);
        tracing::info!("resource {id} registered");
        self.publish(StatusChange::resource_lifecycle(id, None, Some(status), self.now()));
        Ok(ResourceInfo { id, name, status })
    }

    /// Remove a resource. Refused while it still holds any claim, active or not.
    pub async fn delete_resource(&self, id: Ulid) -> Result<ResourceInfo, EngineError> {
        let registry = self.registry.clone().lock_owned().await;
        let txn = self.store.begin(id).await?;
        if txn.claim_count() > 0 {
            return Err(EngineError::HasClaims(id));
        }
        let info = ResourceInfo {
            id,
            name: txn.name.clone(),
            status: txn.status,
        };

        // Removed while still locked: anyone queued on this lock sees NotFound.
        self.commit_registry((registry, txn), Event::ResourceDeleted { id })
            .await?;

        metrics::gauge!(observability::RESOURCES_REGISTERED).set(self.store.resource_count() as f64);
        tracing::info!("resource {id} deleted");
        self.publish(StatusChange::resource_lifecycle(id, Some(info.status), None, self.now()));
        Ok(info)
    }
}
