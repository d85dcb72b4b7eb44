use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

use crate::identity::UserProfile;
use crate::model::*;

use super::{
    AreaFilter, AreaStore, BookingFilter, BookingStore, InMemoryStore, SettingsSource, StoreError,
    UserStore, VisitFilter, VisitStore, VisitorStore, Wal,
};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and is the only writer of `state`.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Apply the batch to `state`, in log order.
/// 6. Respond to all senders.
///
/// A sender that stops waiting does not stop its event: log and memory move together.
async fn wal_writer_loop(mut wal: Wal, state: Arc<InMemoryStore>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
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

                commit_batch(&mut wal, &state, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, &state, other);
                }
            }
            other => handle_non_append(&mut wal, &state, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, state: &InMemoryStore, batch: &mut Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if result.is_ok() {
        for (event, _) in batch.iter() {
            state.apply_event(event);
        }
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, state: &InMemoryStore, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            // Nothing else mutates `state`, so this snapshot matches the log exactly.
            let events = state.snapshot_events();
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, state, &mut batch);
        }
    }
}

/// In-memory document store made durable by a write-ahead log.
///
/// Every mutation is appended (group-committed) before it is applied, so a
/// restart replays exactly the acknowledged writes. Both steps happen on the
/// writer task.
pub struct WalStore {
    state: Arc<InMemoryStore>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay `path` and start the background writer. Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;

        let state = Arc::new(InMemoryStore::new());
        for event in &events {
            state.apply_event(event);
        }
        tracing::info!(path = %path.display(), events = events.len(), "replayed WAL");

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, state.clone(), wal_rx));

        Ok(Self { state, wal_tx })
    }

    /// Read-only view of the current state.
    pub fn state(&self) -> &InMemoryStore {
        &self.state
    }

    async fn request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<io::Result<T>>,
    ) -> Result<T, StoreError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Log then apply. Once the event is queued it lands even if this
    /// future is dropped.
    async fn persist(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.request(WalCommand::Append { event, response: tx }, rx).await
    }

    pub async fn upsert_area(&self, area: Area) -> Result<(), StoreError> {
        self.persist(Event::AreaUpserted(area)).await
    }

    pub async fn replace_settings(&self, location_managers: Vec<String>) -> Result<(), StoreError> {
        self.persist(Event::SettingsReplaced { location_managers }).await
    }

    /// Rewrite the log with only the events needed to recreate the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.request(WalCommand::Compact { response: tx }, rx).await
    }

    pub async fn appends_since_compact(&self) -> u64 {
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

#[async_trait]
impl AreaStore for WalStore {
    async fn get(&self, id: &str) -> Result<Option<Area>, StoreError> {
        Ok(self.state.get_area(id))
    }

    async fn find(&self, filter: &AreaFilter) -> Result<Vec<Area>, StoreError> {
        Ok(self.state.find_areas(filter))
    }
}

#[async_trait]
impl BookingStore for WalStore {
    async fn find(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        Ok(self.state.find_bookings(filter))
    }

    async fn count(&self, filter: &BookingFilter) -> Result<u64, StoreError> {
        Ok(self.state.count_bookings(filter))
    }

    async fn insert(&self, booking: Booking) -> Result<(), StoreError> {
        self.persist(Event::BookingInserted(booking)).await
    }

    async fn delete(&self, filter: &BookingFilter) -> Result<u64, StoreError> {
        let ids = self.state.matching_booking_ids(filter);
        if ids.is_empty() {
            return Ok(0);
        }
        let count = ids.len() as u64;
        self.persist(Event::BookingsDeleted { ids }).await?;
        Ok(count)
    }
}

#[async_trait]
impl VisitStore for WalStore {
    async fn find(&self, filter: &VisitFilter) -> Result<Vec<Visit>, StoreError> {
        Ok(self.state.find_visits(filter))
    }

    async fn count(&self, filter: &VisitFilter) -> Result<u64, StoreError> {
        Ok(self.state.count_visits(filter))
    }

    async fn insert(&self, visit: Visit) -> Result<(), StoreError> {
        self.persist(Event::VisitInserted(visit)).await
    }

    async fn delete(&self, filter: &VisitFilter) -> Result<u64, StoreError> {
        let ids = self.state.matching_visit_ids(filter);
        if ids.is_empty() {
            return Ok(0);
        }
        let count = ids.len() as u64;
        self.persist(Event::VisitsDeleted { ids }).await?;
        Ok(count)
    }

    async fn mark_accepted(&self, id: Ulid) -> Result<bool, StoreError> {
        if !self.state.contains_visit(&id) {
            return Ok(false);
        }
        self.persist(Event::VisitAccepted { id }).await?;
        Ok(true)
    }
}

#[async_trait]
impl SettingsSource for WalStore {
    async fn load_location_managers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.location_managers())
    }
}

#[async_trait]
impl UserStore for WalStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.state.profile(user_id))
    }

    async fn upsert_profile(&self, user_id: &str, profile: UserProfile) -> Result<(), StoreError> {
        self.persist(Event::ProfileUpserted {
            user_id: user_id.to_string(),
            profile,
        })
        .await
    }
}

#[async_trait]
impl VisitorStore for WalStore {
    async fn get_visitor(&self, id: Ulid) -> Result<Option<Visitor>, StoreError> {
        Ok(self.state.visitor(&id))
    }

    async fn insert_visitor(&self, visitor: Visitor) -> Result<(), StoreError> {
        self.persist(Event::VisitorAdded(visitor)).await
    }
}
