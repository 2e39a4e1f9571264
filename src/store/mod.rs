mod index;
mod memory;
mod wal_store;

pub use index::{BookingIndex, DayState};
pub use memory::MemoryStore;
pub use wal_store::WalStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::{Booking, BookingId, NewBooking};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Io(String),
    Closed,
    LimitExceeded(&'static str),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store I/O error: {e}"),
            StoreError::Closed => write!(f, "store is closed"),
            StoreError::LimitExceeded(msg) => write!(f, "store limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Durable record collection for bookings.
///
/// Each call is atomic on its own, but calls are not serialized against
/// each other: check-then-write sequences are the caller's concern.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Persist a new booking, assigning `id` and `created_at`.
    async fn insert(&self, booking: NewBooking) -> Result<Booking, StoreError>;

    /// Bookings on `date`, ordered by `(start_time, id)`.
    async fn query_by_date(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError>;

    /// Every booking, ordered by `(date, start_time, id)`.
    async fn query_all(&self) -> Result<Vec<Booking>, StoreError>;

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Overwrite the fields of `id`. `None` means zero rows affected.
    async fn update_by_id(
        &self,
        id: BookingId,
        booking: NewBooking,
    ) -> Result<Option<Booking>, StoreError>;

    /// Returns rows affected (0 or 1).
    async fn delete_by_id(&self, id: BookingId) -> Result<u64, StoreError>;

    /// Flush and release resources. Idempotent; later calls fail with `Closed`.
    async fn close(&self) -> Result<(), StoreError>;
}
