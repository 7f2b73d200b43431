mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;
mod store;

pub use error::{EngineError, Unavailable};
pub use queries::BookingFilter;
pub use slots::{Slot, Slots};
pub use store::ReservationStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock, RwLockReadGuard};
use ulid::Ulid;

use crate::catalog::{CustomerDirectory, ServiceCatalog};
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedStylistState = Arc<RwLock<StylistState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// Every append that is already queued when the first one arrives rides the
/// same fsync; a non-append command closes the batch early.
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
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    tracing::debug!("WAL writer for {} stopped", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't leak
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    if let Err(e) = &result {
        tracing::error!(batch = batch.len(), "WAL flush failed: {e}");
    }
    for (_, tx) in batch {
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
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// One tenant's scheduling core: stylists, their weekly windows and their
/// reservations, persisted through the WAL.
pub struct Engine {
    pub store: ReservationStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) catalog: Arc<dyn ServiceCatalog>,
    pub(super) customers: Arc<dyn CustomerDirectory>,
    /// Held shared by every mutation and exclusively by compaction, so no
    /// append lands between the snapshot and the file swap.
    write_gate: RwLock<()>,
    granularity: Minutes,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        catalog: Arc<dyn ServiceCatalog>,
        customers: Arc<dyn CustomerDirectory>,
        granularity: Minutes,
    ) -> io::Result<Self> {
        if granularity == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "slot granularity must be positive"));
        }
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: ReservationStore::new(),
            wal_tx,
            catalog,
            customers,
            write_gate: RwLock::new(()),
            granularity,
        };

        // Sole owner of every lock here, so try_write never contends; a
        // contended lock is a bug and fails the open. Never block: this may
        // run inside an async context (lazy tenant creation).
        for event in &events {
            if let Event::StylistCreated { id, name } = event {
                engine.store.insert_stylist(StylistState::new(*id, name.clone()));
                continue;
            }
            let stylist_id = event.stylist_id();
            let Some(rs) = engine.store.get_stylist(&stylist_id) else {
                tracing::warn!(%stylist_id, "replay: event for unknown stylist skipped");
                continue;
            };
            let mut guard = rs.try_write().map_err(|_| {
                io::Error::other(format!("replay: stylist {stylist_id} state is locked"))
            })?;
            engine.store.apply_event(&mut guard, event);
        }
        tracing::debug!(
            events = events.len(),
            stylists = engine.store.stylist_count(),
            "replayed {}",
            wal_path.display()
        );

        Ok(engine)
    }

    pub fn granularity(&self) -> Minutes {
        self.granularity
    }

    pub fn get_stylist(&self, id: &Ulid) -> Option<SharedStylistState> {
        self.store.get_stylist(id)
    }

    pub(super) async fn begin_write(&self) -> RwLockReadGuard<'_, ()> {
        self.write_gate.read().await
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
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

    /// Make `event` durable, then apply it to the locked stylist.
    pub(super) async fn persist_and_apply(&self, rs: &mut StylistState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(rs, event);
        Ok(())
    }

    /// Lookup booking → stylist, acquire the stylist's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(chrono::NaiveDate, tokio::sync::OwnedRwLockWriteGuard<StylistState>), EngineError> {
        let (stylist_id, date) = self
            .store
            .locate_reservation(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .store
            .get_stylist(&stylist_id)
            .ok_or(EngineError::NotFound(stylist_id))?;
        Ok((date, rs.write_owned().await))
    }

    /// Lookup window → stylist, acquire the stylist's write lock.
    pub(super) async fn resolve_window_write(
        &self,
        window_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<StylistState>, EngineError> {
        let stylist_id = self
            .store
            .stylist_for_window(window_id)
            .ok_or(EngineError::NotFound(*window_id))?;
        let rs = self
            .store
            .get_stylist(&stylist_id)
            .ok_or(EngineError::NotFound(stylist_id))?;
        Ok(rs.write_owned().await)
    }

    pub(super) async fn lock_compaction(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.write_gate.write().await
    }
}
