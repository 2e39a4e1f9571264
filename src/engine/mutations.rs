use tracing::{debug, info};

use crate::model::*;
use crate::observability::*;

use super::conflict::check_no_conflict;
use super::{EngineError, Scheduler};

fn validate(draft: &BookingDraft) -> Result<NewBooking, EngineError> {
    draft.validate().map_err(|e| {
        debug!("rejected booking draft: {e}");
        metrics::counter!(VALIDATION_FAILURES_TOTAL).increment(1);
        EngineError::Validation(e)
    })
}

fn note_conflict(result: Result<(), EngineError>) -> Result<(), EngineError> {
    if let Err(EngineError::Conflict { existing }) = &result {
        debug!("conflict with booking {existing}");
        metrics::counter!(CONFLICTS_TOTAL).increment(1);
    }
    result
}

impl Scheduler {
    /// Admit a new booking if its interval is free on its date.
    pub async fn create(&self, draft: &BookingDraft) -> Result<Booking, EngineError> {
        let new = validate(draft)?;

        let date = self.lock_date(new.date).await;
        let existing = self
            .store_call("query_by_date", self.store.query_by_date(new.date))
            .await?;
        note_conflict(check_no_conflict(&existing, &new.span, None))?;

        let booking = self
            .store_write("insert", date, move |store| async move { store.insert(new).await })
            .await?;
        info!(
            "booked {} on {} [{}, {})",
            booking.id, booking.date, booking.start_time, booking.end_time
        );
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(booking)
    }

    /// Replace booking `id`. The booking's own current interval never
    /// counts as a conflict.
    pub async fn update(&self, id: BookingId, draft: &BookingDraft) -> Result<Booking, EngineError> {
        let new = validate(draft)?;

        // Leaving the old date cannot create an overlap there, so only the
        // target date needs the lock.
        let date = self.lock_date(new.date).await;
        let existing = self
            .store_call("query_by_date", self.store.query_by_date(new.date))
            .await?;
        note_conflict(check_no_conflict(&existing, &new.span, Some(id)))?;

        let booking = self
            .store_write("update_by_id", date, move |store| async move {
                store.update_by_id(id, new).await
            })
            .await?
            .ok_or(EngineError::NotFound(id))?;
        info!(
            "rebooked {} on {} [{}, {})",
            booking.id, booking.date, booking.start_time, booking.end_time
        );
        metrics::counter!(BOOKINGS_UPDATED_TOTAL).increment(1);
        Ok(booking)
    }

    /// Remove booking `id`. Needs no conflict check.
    pub async fn delete(&self, id: BookingId) -> Result<(), EngineError> {
        let affected = self
            .store_call("delete_by_id", self.store.delete_by_id(id))
            .await?;
        if affected == 0 {
            return Err(EngineError::NotFound(id));
        }
        info!("cancelled booking {id}");
        metrics::counter!(BOOKINGS_DELETED_TOTAL).increment(1);
        Ok(())
    }
}
