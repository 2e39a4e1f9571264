use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::model::*;
use crate::wal::Wal;

use super::{BookingIndex, BookingStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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
    Shutdown {
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Background task that owns the log and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut pending = Some(cmd);
        while let Some(cmd) = pending.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    let mut batch = vec![(event, response)];
                    loop {
                        match rx.try_recv() {
                            Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                            Ok(other) => {
                                pending = Some(other);
                                break;
                            }
                            Err(_) => break, // channel drained, flush the batch
                        }
                    }
                    commit_batch(&mut wal, batch);
                }
                WalCommand::Compact { events, response } => {
                    let result = Wal::write_compact_file(wal.path(), &events)
                        .and_then(|()| wal.swap_compact_file());
                    let _ = response.send(result);
                }
                WalCommand::AppendsSinceCompact { response } => {
                    let _ = response.send(wal.appends_since_compact());
                }
                WalCommand::Shutdown { response } => {
                    let _ = response.send(wal.flush_sync());
                    debug!("log writer stopped");
                    return;
                }
            }
        }
    }
}

/// Write and sync a batch; all of it lands or none of it does.
fn commit_batch(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let written = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    if let Err(ref e) = written {
        error!("log batch of {} records failed: {e}", batch.len());
        if let Err(e) = wal.rollback() {
            error!("could not roll back failed log batch: {e}");
        }
    }
    for (_, tx) in batch {
        let r = match &written {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// State the mutation tasks share with the store handle.
struct Shared {
    index: BookingIndex,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl Shared {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<T, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(make(tx))
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        self.request(|response| WalCommand::Append { event, response })
            .await?
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}

/// Embedded file-backed store: an in-memory index rebuilt from an
/// append-only log on open.
///
/// Every mutation appends to the log and then applies to the index on a
/// task of its own. A caller that stops waiting (a timeout, a dropped
/// request) abandons only the wait, so the log and the index never
/// disagree about a write.
pub struct WalStore {
    shared: Arc<Shared>,
    writer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    path: PathBuf,
}

impl WalStore {
    /// Recover the log at `path` and start the writer task. Must be called
    /// inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::recover(path)?;
        let replayed = events.len();
        let index = BookingIndex::from_events(events);
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        let writer = tokio::spawn(wal_writer_loop(wal, wal_rx));

        info!(
            "opened booking log {} ({replayed} records, {} bookings)",
            path.display(),
            index.len()
        );
        Ok(Self {
            shared: Arc::new(Shared { index, wal_tx }),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            path: path.to_path_buf(),
        })
    }

    pub fn len(&self) -> usize {
        self.shared.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.index.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Run a mutation to completion on its own task.
    async fn detached<T, F, Fut>(&self, mutation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Shared>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        self.ensure_open()?;
        tokio::spawn(mutation(self.shared.clone()))
            .await
            .map_err(|e| StoreError::Io(format!("write task failed: {e}")))?
    }

    /// Rewrite the log with only the records needed to recreate current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let _exclusive = self.shared.index.exclusive().await;
        let events = self.shared.index.snapshot_events().await;
        let count = events.len();
        self.shared
            .request(|response| WalCommand::Compact { events, response })
            .await?
            .map_err(|e| StoreError::Io(e.to_string()))?;
        info!("compacted booking log to {count} records");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.shared
            .request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .unwrap_or(0)
    }
}

#[async_trait]
impl BookingStore for WalStore {
    async fn insert(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        self.detached(move |shared| async move {
            shared.index.insert_with(booking, |e| shared.wal_append(e)).await
        })
        .await
    }

    async fn query_by_date(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        self.ensure_open()?;
        Ok(self.shared.index.by_date(date).await)
    }

    async fn query_all(&self) -> Result<Vec<Booking>, StoreError> {
        self.ensure_open()?;
        Ok(self.shared.index.all().await)
    }

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.ensure_open()?;
        Ok(self.shared.index.get(id).await)
    }

    async fn update_by_id(
        &self,
        id: BookingId,
        booking: NewBooking,
    ) -> Result<Option<Booking>, StoreError> {
        self.detached(move |shared| async move {
            shared.index.update_with(id, booking, |e| shared.wal_append(e)).await
        })
        .await
    }

    async fn delete_by_id(&self, id: BookingId) -> Result<u64, StoreError> {
        self.detached(move |shared| async move {
            shared.index.delete_with(id, |e| shared.wal_append(e)).await
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Wait for in-flight writers so their appends reach the log first.
        let _exclusive = self.shared.index.exclusive().await;
        let flushed = self
            .shared
            .request(|response| WalCommand::Shutdown { response })
            .await
            .and_then(|r| r.map_err(|e| StoreError::Io(e.to_string())));
        if let Some(handle) = self.writer.lock().await.take()
            && let Err(e) = handle.await {
                error!("log writer task failed: {e}");
            }
        info!("closed booking log {}", self.path.display());
        flushed
    }
}
