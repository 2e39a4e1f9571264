use chrono::NaiveDate;

use crate::model::*;

use super::{EngineError, Scheduler};

impl Scheduler {
    /// Bookings on `date`, ordered by start time then id.
    pub async fn list_by_date(&self, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        let mut bookings = self
            .store_call("query_by_date", self.store.query_by_date(date))
            .await?;
        bookings.sort_by_key(|b| (b.start_time, b.id));
        Ok(bookings)
    }

    /// Every booking, ordered by date, start time, then id.
    pub async fn list_all(&self) -> Result<Vec<Booking>, EngineError> {
        let mut bookings = self.store_call("query_all", self.store.query_all()).await?;
        bookings.sort_by_key(|b| (b.date, b.start_time, b.id));
        Ok(bookings)
    }

    pub async fn get(&self, id: BookingId) -> Result<Booking, EngineError> {
        self.store_call("get", self.store.get(id))
            .await?
            .ok_or(EngineError::NotFound(id))
    }
}
