mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod tasks;

pub use conflict::{now_ms, validate_slot, MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
pub use error::EngineError;
pub use mutations::CleanupReport;
pub use store::{DeletedTree, Store};
pub use tasks::{
    ReservationTask, ResourceDescriptor, ResourceReservationTask, ReuseReservationTask,
    SchedulerContext, SchedulerError, ValueReservationTask,
};

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::acl::AclManager;
use crate::identifier::LocalDomain;
use crate::model::Event;
use crate::observability;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Events of one committed transaction.
    Append {
        events: Vec<Event>,
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

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. Single flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    'batch: for (events, _) in batch {
        for event in events {
            if let Err(e) = wal.append_buffered(event) {
                append_err = Some(e);
                break 'batch;
            }
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Reservation engine: the entity store, its journal and the collaborators deletion needs.
///
/// Every mutation runs as one transaction under the store's write lock, so overlap checks
/// and the inserts they guard can never interleave with another allocation or deletion.
pub struct Engine {
    store: RwLock<Store>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    acl: Arc<dyn AclManager>,
    domain: LocalDomain,
}

impl Engine {
    /// Engine without a journal; state lives only as long as the process.
    pub fn in_memory(domain: LocalDomain, acl: Arc<dyn AclManager>) -> Self {
        Self {
            store: RwLock::new(Store::new(domain.clone())),
            wal_tx: None,
            acl,
            domain,
        }
    }

    /// Replay the journal at `wal_path` and keep appending to it. Must run inside a tokio runtime.
    pub fn open(wal_path: &Path, domain: LocalDomain, acl: Arc<dyn AclManager>) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let replayed = events.len();
        let store = Store::from_events(domain.clone(), events);
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));
        tracing::info!(
            path = %wal_path.display(),
            replayed,
            reservations = store.reservation_count(),
            "journal replayed"
        );
        metrics::gauge!(observability::LIVE_RESERVATIONS).set(store.reservation_count() as f64);
        Ok(Self {
            store: RwLock::new(store),
            wal_tx: Some(wal_tx),
            acl,
            domain,
        })
    }

    pub fn domain(&self) -> &LocalDomain {
        &self.domain
    }

    pub fn acl(&self) -> &Arc<dyn AclManager> {
        &self.acl
    }

    /// Run `f` against a consistent view of the store.
    pub async fn read<T>(&self, f: impl FnOnce(&Store) -> T) -> T {
        let guard = self.store.read().await;
        f(&guard)
    }

    /// Run `f` atomically.
    ///
    /// `f` works on a copy of the store; the copy replaces the store only after it passes
    /// validation and its changes reach the journal. An error or a panic inside `f` leaves
    /// the store untouched.
    pub(crate) async fn transaction<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Store) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let started = Instant::now();
        let mut guard = self.store.write().await;
        let mut working = guard.clone();
        let value = f(&mut working)?;
        working.validate();
        let events = working.changes_since(&guard);
        if !events.is_empty() {
            self.wal_append(events).await?;
        }
        *guard = working;
        metrics::gauge!(observability::LIVE_RESERVATIONS).set(guard.reservation_count() as f64);
        metrics::histogram!(observability::TRANSACTION_DURATION_SECONDS, "operation" => operation)
            .record(started.elapsed().as_secs_f64());
        Ok(value)
    }

    async fn wal_append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// Rewrite the journal as the minimal set of records recreating the current state.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        // Hold the read lock so no commit slips in between snapshot and swap.
        let guard = self.store.read().await;
        let events = guard.snapshot_events();
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
