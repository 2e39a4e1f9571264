use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockWriteGuard};

use crate::limits::MAX_BOOKINGS;
use crate::model::*;

use super::StoreError;

/// All bookings on one date, sorted by `(start_time, id)`.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: NaiveDate,
    pub bookings: Vec<Booking>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            bookings: Vec::new(),
        }
    }

    pub fn insert(&mut self, booking: Booking) {
        let key = (booking.start_time, booking.id);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.start_time, b.id))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }
}

pub type SharedDay = Arc<RwLock<DayState>>;

/// Day-partitioned booking index shared by the store implementations.
///
/// Writers hold the write lock of every day they touch (acquired in date
/// order) for the duration of `commit` + apply, so the commit order seen by
/// a log matches the order in which changes become visible.
pub struct BookingIndex {
    days: DashMap<NaiveDate, SharedDay>,
    id_to_date: DashMap<BookingId, NaiveDate>,
    last_id: AtomicU64,
    /// Held shared by writers, exclusively while a snapshot must not race writes.
    gate: RwLock<()>,
}

impl Default for BookingIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingIndex {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            id_to_date: DashMap::new(),
            last_id: AtomicU64::new(0),
            gate: RwLock::new(()),
        }
    }

    /// Rebuild from a replayed event log. Later events win.
    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut days: HashMap<NaiveDate, DayState> = HashMap::new();
        let mut id_to_date: HashMap<BookingId, NaiveDate> = HashMap::new();
        let mut last_id = 0;

        for event in events {
            match event {
                Event::Inserted(booking) | Event::Updated(booking) => {
                    let (id, date) = (booking.id, booking.date);
                    last_id = last_id.max(id);
                    if let Some(old) = id_to_date.insert(id, date)
                        && let Some(day) = days.get_mut(&old) {
                            day.remove(id);
                        }
                    days.entry(date)
                        .or_insert_with(|| DayState::new(date))
                        .insert(booking);
                }
                Event::Deleted { id } => {
                    if let Some(date) = id_to_date.remove(&id)
                        && let Some(day) = days.get_mut(&date) {
                            day.remove(id);
                        }
                }
                Event::IdWatermark { last_id: mark } => last_id = last_id.max(mark),
            }
        }

        Self {
            days: days
                .into_iter()
                .filter(|(_, day)| !day.bookings.is_empty())
                .map(|(date, day)| (date, Arc::new(RwLock::new(day))))
                .collect(),
            id_to_date: id_to_date.into_iter().collect(),
            last_id: AtomicU64::new(last_id),
            gate: RwLock::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_date.is_empty()
    }

    pub fn last_id(&self) -> BookingId {
        self.last_id.load(Ordering::SeqCst)
    }

    /// Block writers until the returned guard is dropped.
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    fn day(&self, date: NaiveDate) -> SharedDay {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .clone()
    }

    fn date_of(&self, id: BookingId) -> Option<NaiveDate> {
        self.id_to_date.get(&id).map(|e| *e.value())
    }

    /// Drop the guard, removing its day from the map if the day is empty and
    /// no other task holds a handle to it.
    fn release(&self, guard: OwnedRwLockWriteGuard<DayState>) {
        if guard.bookings.is_empty() {
            // the map entry and this guard are the only expected references
            self.days
                .remove_if(&guard.date, |_, day| Arc::strong_count(day) == 2);
        }
    }

    fn release_all(&self, guards: Vec<OwnedRwLockWriteGuard<DayState>>) {
        for guard in guards {
            self.release(guard);
        }
    }

    /// Lock each distinct date in ascending order.
    async fn lock_days(&self, mut dates: Vec<NaiveDate>) -> Vec<OwnedRwLockWriteGuard<DayState>> {
        dates.sort();
        dates.dedup();
        let mut guards = Vec::with_capacity(dates.len());
        for date in dates {
            guards.push(self.day(date).write_owned().await);
        }
        guards
    }

    pub async fn by_date(&self, date: NaiveDate) -> Vec<Booking> {
        let Some(day) = self.days.get(&date).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard.bookings.clone()
    }

    /// Every booking, ordered by `(date, start_time, id)`.
    pub async fn all(&self) -> Vec<Booking> {
        let mut days: Vec<(NaiveDate, SharedDay)> = self
            .days
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        days.sort_by_key(|(date, _)| *date);

        let mut out = Vec::with_capacity(self.len());
        for (_, day) in days {
            out.extend(day.read().await.bookings.iter().cloned());
        }
        out
    }

    pub async fn get(&self, id: BookingId) -> Option<Booking> {
        let date = self.date_of(id)?;
        let day = self.days.get(&date).map(|e| e.value().clone())?;
        let guard = day.read().await;
        guard.bookings.iter().find(|b| b.id == id).cloned()
    }

    /// Events that recreate the current state, for log compaction.
    /// Call while holding [`exclusive`](Self::exclusive).
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.all().await.into_iter().map(Event::Inserted).collect();
        events.push(Event::IdWatermark {
            last_id: self.last_id(),
        });
        events
    }

    pub async fn insert_with<F, Fut>(&self, new: NewBooking, commit: F) -> Result<Booking, StoreError>
    where
        F: FnOnce(Event) -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let _gate = self.gate.read().await;
        if self.len() >= MAX_BOOKINGS {
            return Err(StoreError::LimitExceeded("too many bookings"));
        }
        let mut guard = self.day(new.date).write_owned().await;

        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let booking = new.into_booking(id, Utc::now());
        if let Err(e) = commit(Event::Inserted(booking.clone())).await {
            self.release(guard);
            return Err(e);
        }

        guard.insert(booking.clone());
        self.id_to_date.insert(id, booking.date);
        Ok(booking)
    }

    /// Replace the fields of `id`, keeping `id` and `created_at`.
    /// Returns `None` when no such booking exists.
    pub async fn update_with<F, Fut>(
        &self,
        id: BookingId,
        new: NewBooking,
        commit: F,
    ) -> Result<Option<Booking>, StoreError>
    where
        F: FnOnce(Event) -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let _gate = self.gate.read().await;
        loop {
            let Some(old_date) = self.date_of(id) else {
                return Ok(None);
            };
            let mut guards = self.lock_days(vec![old_date, new.date]).await;
            // A concurrent update may have moved the booking before we locked.
            if self.date_of(id) != Some(old_date) {
                self.release_all(guards);
                continue;
            }
            let old_idx = guards.iter().position(|g| g.date == old_date);
            let new_idx = guards.iter().position(|g| g.date == new.date);
            let created_at = old_idx.and_then(|i| {
                guards[i].bookings.iter().find(|b| b.id == id).map(|b| b.created_at)
            });
            let (Some(old_idx), Some(new_idx), Some(created_at)) = (old_idx, new_idx, created_at)
            else {
                self.release_all(guards);
                return Ok(None);
            };

            let updated = new.into_booking(id, created_at);
            if let Err(e) = commit(Event::Updated(updated.clone())).await {
                self.release_all(guards);
                return Err(e);
            }

            guards[old_idx].remove(id);
            guards[new_idx].insert(updated.clone());
            self.id_to_date.insert(id, updated.date);
            self.release_all(guards);
            return Ok(Some(updated));
        }
    }

    /// Remove `id`. Returns rows affected.
    pub async fn delete_with<F, Fut>(&self, id: BookingId, commit: F) -> Result<u64, StoreError>
    where
        F: FnOnce(Event) -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let _gate = self.gate.read().await;
        loop {
            let Some(date) = self.date_of(id) else {
                return Ok(0);
            };
            let mut guard = self.day(date).write_owned().await;
            if self.date_of(id) != Some(date) {
                self.release(guard);
                continue;
            }
            if !guard.bookings.iter().any(|b| b.id == id) {
                self.release(guard);
                return Ok(0);
            }

            if let Err(e) = commit(Event::Deleted { id }).await {
                self.release(guard);
                return Err(e);
            }

            guard.remove(id);
            self.id_to_date.remove(&id);
            self.release(guard);
            return Ok(1);
        }
    }
}
