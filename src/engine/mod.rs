mod conflict;
mod error;
mod queries;
mod reconcile;
mod reservations;
mod resources;
mod service;
mod status;
mod store;

pub use conflict::{check_conflict, ConflictScope};
pub use error::EngineError;
pub use reconcile::{ReconcileReport, ResourceReconcile};
pub use status::derive_status;
pub use store::{ClaimStore, ResourceTxn, SharedResourceState};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::EventSink;
use crate::observability;
use crate::wal::Wal;

use store::event_resource_id;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while one fsync is in flight are
/// written together and share the next fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so partial bytes don't leak into the
    // next batch; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Write event to WAL via the background group-commit writer.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

fn commit_task_failed(e: tokio::task::JoinError) -> EngineError {
    EngineError::WalError(format!("commit task failed: {e}"))
}

/// The conflict and reconciliation engine for one fleet.
pub struct Engine {
    pub store: Arc<ClaimStore>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) sink: Arc<dyn EventSink>,
    pub(super) clock: Arc<dyn Clock>,
    /// Serializes resource create/delete with each other and with compaction.
    pub(super) registry: Arc<Mutex<()>>,
}

impl Engine {
    /// Open the engine on a WAL file, using the wall clock.
    pub fn new(wal_path: PathBuf, sink: Arc<dyn EventSink>) -> io::Result<Self> {
        Self::with_clock(wal_path, sink, Arc::new(SystemClock))
    }

    /// Open the engine with an explicit time source. Must run inside a tokio runtime.
    pub fn with_clock(
        wal_path: PathBuf,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Arc::new(ClaimStore::new()),
            wal_tx,
            sink,
            clock,
            registry: Arc::new(Mutex::new(())),
        };

        // Nothing else holds these locks yet, so try_write always succeeds.
        // Never block here: this may run inside an async context.
        for event in &events {
            match event_resource_id(event) {
                None => engine.store.apply_registry_event(event),
                Some(resource_id) => {
                    if let Some(rs) = engine.store.get_resource(&resource_id)
                        && let Ok(mut guard) = rs.try_write()
                    {
                        engine.store.apply_event(&mut guard, event);
                    }
                }
            }
        }
        tracing::debug!(
            "replayed {} events into {} resources",
            events.len(),
            engine.store.resource_count()
        );

        Ok(engine)
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    /// Make an event durable, then apply it to the locked resource.
    ///
    /// The append and the apply run on their own task, which owns the guard.
    /// A caller that stops waiting cannot leave an event logged but not
    /// applied, and nobody else gets the lock in between. The guard is handed
    /// back once the event is applied.
    pub(super) async fn commit(&self, mut txn: ResourceTxn, event: Event) -> Result<ResourceTxn, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            wal_append(&wal_tx, &event).await?;
            store.apply_event(&mut txn, &event);
            Ok::<_, EngineError>(txn)
        })
        .await
        .map_err(commit_task_failed)?
    }

    /// `commit` for resource create/delete. `held` (the registry guard, plus
    /// the resource guard on delete) is released after the event is applied.
    pub(super) async fn commit_registry<G>(&self, held: G, event: Event) -> Result<(), EngineError>
    where
        G: Send + 'static,
    {
        let wal_tx = self.wal_tx.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            wal_append(&wal_tx, &event).await?;
            store.apply_registry_event(&event);
            drop(held);
            Ok::<_, EngineError>(())
        })
        .await
        .map_err(commit_task_failed)?
    }

    pub(super) fn publish(&self, change: StatusChange) {
        self.sink.publish(&change);
    }

    /// Rewrite the WAL with only the events needed to rebuild current state.
    /// Every resource stays read-locked until the swap, so no committed
    /// append can fall between the snapshot and the new file.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let mut guards = Vec::new();
        let mut events = Vec::new();
        for id in self.store.resource_ids() {
            let Some(rs) = self.store.get_resource(&id) else {
                continue;
            };
            let guard = rs.read_owned().await;
            events.push(Event::ResourceCreated {
                id: guard.id,
                name: guard.name.clone(),
                status: guard.status,
            });
            for reservation in &guard.reservations {
                events.push(Event::ReservationPlaced {
                    reservation: reservation.clone(),
                });
            }
            for window in &guard.windows {
                events.push(Event::ServiceWindowOpened {
                    window: window.clone(),
                });
            }
            guards.push(guard);
        }

        let event_count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        if result.is_ok() {
            tracing::info!("compacted WAL to {event_count} events");
        }
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
