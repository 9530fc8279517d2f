use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::StatusChange;

const CHANNEL_CAPACITY: usize = 256;
const FIREHOSE_CAPACITY: usize = 4096;

/// Receives every status change the engine commits. Delivery is best-effort.
pub trait EventSink: Send + Sync {
    fn publish(&self, change: &StatusChange);
}

/// Broadcast hub: per-resource channels plus one channel carrying everything.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<StatusChange>>,
    all: broadcast::Sender<StatusChange>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(FIREHOSE_CAPACITY).0,
        }
    }

    /// Subscribe to changes on one resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<StatusChange> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to changes on every resource.
    pub fn subscribe_all(&self) -> broadcast::Receiver<StatusChange> {
        self.all.subscribe()
    }

    /// Drop a resource's channel. Its subscribers see the channel close.
    pub fn remove(&self, resource_id: &Ulid) {
        self.channels.remove(resource_id);
    }
}

impl EventSink for NotifyHub {
    /// No-op if nobody is listening.
    fn publish(&self, change: &StatusChange) {
        if let Some(sender) = self.channels.get(&change.resource_id) {
            let _ = sender.send(change.clone());
        }
        if change.is_resource_removal() {
            self.remove(&change.resource_id);
        }
        let _ = self.all.send(change.clone());
    }
}
