use std::future::ready;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::*;

use super::{BookingIndex, BookingStore, StoreError};

/// Non-durable store. Contents are lost when dropped.
#[derive(Default)]
pub struct MemoryStore {
    index: BookingIndex,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn insert(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        self.ensure_open()?;
        self.index.insert_with(booking, |_| ready(Ok(()))).await
    }

    async fn query_by_date(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        self.ensure_open()?;
        Ok(self.index.by_date(date).await)
    }

    async fn query_all(&self) -> Result<Vec<Booking>, StoreError> {
        self.ensure_open()?;
        Ok(self.index.all().await)
    }

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.ensure_open()?;
        Ok(self.index.get(id).await)
    }

    async fn update_by_id(
        &self,
        id: BookingId,
        booking: NewBooking,
    ) -> Result<Option<Booking>, StoreError> {
        self.ensure_open()?;
        self.index.update_with(id, booking, |_| ready(Ok(()))).await
    }

    async fn delete_by_id(&self, id: BookingId) -> Result<u64, StoreError> {
        self.ensure_open()?;
        self.index.delete_with(id, |_| ready(Ok(()))).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
