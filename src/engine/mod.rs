mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{availability_view, BLOCKED_LABEL, BOOKED_LABEL};
pub use error::EngineError;
pub use store::TimelineStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedHostState = Arc<RwLock<HostState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush what we have before handling the non-append command
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        tracing::error!(error = %e, batch = batch.len(), "WAL flush failed");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes don't leak into the
    // next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
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
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// One tenant's scheduling core: host timelines in memory, durably logged.
pub struct Engine {
    pub store: TimelineStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes host creation, host deletion and compaction.
    pub(super) registry: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: TimelineStore::new(),
            wal_tx,
            registry: Mutex::new(()),
        };

        // We are the sole owner of these Arcs during replay, so try_read/try_write
        // always succeed. Never use blocking_read/blocking_write here: this runs
        // inside an async context when tenants are created lazily.
        for event in &events {
            match event {
                Event::HostCreated {
                    id,
                    slug,
                    email,
                    created_at,
                } => {
                    engine
                        .store
                        .insert_host(HostState::new(*id, slug.clone(), email.clone(), *created_at));
                }
                Event::HostDeleted { id } => {
                    if let Some(hs) = engine.store.get_host(id)
                        && let Ok(guard) = hs.try_read()
                    {
                        engine.store.remove_host(&guard);
                    }
                }
                other => {
                    if let Some(host_id) = event_host_id(other)
                        && let Some(hs) = engine.store.get_host(&host_id)
                        && let Ok(mut guard) = hs.try_write()
                    {
                        engine.store.apply_event(&mut guard, other);
                    }
                }
            }
        }

        tracing::debug!(
            path = %wal_path.display(),
            events = events.len(),
            hosts = engine.store.host_count(),
            "engine replayed WAL"
        );
        Ok(engine)
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

    /// WAL-append then apply, with the host's write lock held by the caller.
    /// Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        hs: &mut HostState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(hs, event);
        Ok(())
    }

    /// Resolve a slug and take that host's write lock.
    pub(super) async fn resolve_host_write(
        &self,
        slug: &str,
    ) -> Result<OwnedRwLockWriteGuard<HostState>, EngineError> {
        let hs = self
            .store
            .get_host_by_slug(slug)
            .ok_or_else(|| EngineError::HostNotFound(slug.to_string()))?;
        let guard = hs.write_owned().await;
        // The host may have been deleted while we waited for the lock
        if !self.store.contains_host(&guard.id) {
            return Err(EngineError::HostNotFound(slug.to_string()));
        }
        Ok(guard)
    }

    /// Lookup entity → host, then take that host's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<HostState>, EngineError> {
        let host_id = self
            .store
            .get_host_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let hs = self
            .store
            .get_host(&host_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let guard = hs.write_owned().await;
        if !self.store.contains_host(&host_id) {
            return Err(EngineError::NotFound(*entity_id));
        }
        Ok(guard)
    }
}

/// Extract the owning host from a timeline event.
fn event_host_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BlockSet { host_id, .. }
        | Event::BlockDeleted { host_id, .. }
        | Event::BookingCreated { host_id, .. } => Some(*host_id),
        Event::HostCreated { .. } | Event::HostDeleted { .. } => None,
    }
}
