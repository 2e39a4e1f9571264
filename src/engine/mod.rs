mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use error::EngineError;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::{BookingStore, StoreError};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

type DateLocks = Arc<DashMap<NaiveDate, Arc<Mutex<()>>>>;

/// Admission control for bookings of the single room.
///
/// Holds no booking state of its own: every decision re-reads the store.
/// Mutations on the same date are serialized through a per-date lock held
/// across the read-check-write sequence; reads never lock.
pub struct Scheduler {
    store: Arc<dyn BookingStore>,
    date_locks: DateLocks,
    store_timeout: Duration,
}

/// Held for the duration of one date's read-check-write.
pub(super) struct DateGuard {
    date: NaiveDate,
    guard: Option<OwnedMutexGuard<()>>,
    locks: DateLocks,
}

impl Drop for DateGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Prune the lock unless another task is holding or waiting on it.
        self.locks
            .remove_if(&self.date, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Scheduler {
    pub fn new(store: Arc<dyn BookingStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            date_locks: Arc::new(DashMap::new()),
            store_timeout,
        }
    }

    /// Number of dates with a live mutation lock.
    pub fn locked_dates(&self) -> usize {
        self.date_locks.len()
    }

    pub(super) async fn lock_date(&self, date: NaiveDate) -> DateGuard {
        let lock = self
            .date_locks
            .entry(date)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        DateGuard {
            date,
            guard: Some(guard),
            locks: self.date_locks.clone(),
        }
    }

    /// Run a store write on its own task, carrying the date guard with it.
    /// A caller that gives up waiting cannot release the date while the
    /// write is still landing.
    pub(super) async fn store_write<T, W, Fut>(
        &self,
        op: &'static str,
        guard: DateGuard,
        write: W,
    ) -> Result<T, EngineError>
    where
        T: Send + 'static,
        W: FnOnce(Arc<dyn BookingStore>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let pending = write(self.store.clone());
        let task = tokio::spawn(async move {
            let result = pending.await;
            drop(guard);
            result
        });
        self.store_call(op, async move {
            task.await
                .unwrap_or_else(|e| Err(StoreError::Io(format!("{op} task failed: {e}"))))
        })
        .await
    }

    /// Run a store call under the configured timeout.
    pub(super) async fn store_call<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, EngineError> {
        let err = match tokio::time::timeout(self.store_timeout, call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => EngineError::from(e),
            Err(_) => EngineError::StoreUnavailable(format!(
                "{op} timed out after {}ms",
                self.store_timeout.as_millis()
            )),
        };
        tracing::error!("store {op} failed: {err}");
        metrics::counter!(crate::observability::STORE_ERRORS_TOTAL, "op" => op).increment(1);
        Err(err)
    }
}
