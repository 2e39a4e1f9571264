use super::*;
use super::conflict::find_conflict;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};

use crate::model::*;
use crate::store::MemoryStore;

fn draft(title: &str, date: &str, start: &str, end: &str) -> BookingDraft {
    BookingDraft {
        title: Some(title.into()),
        date: Some(date.into()),
        start_time: Some(start.into()),
        end_time: Some(end.into()),
        ..Default::default()
    }
}

fn scheduler() -> Scheduler {
    Scheduler::new(Arc::new(MemoryStore::new()), DEFAULT_STORE_TIMEOUT)
}

fn date(s: &str) -> NaiveDate {
    parse_date(s).unwrap()
}

fn t(s: &str) -> TimeOfDay {
    s.parse().unwrap()
}

fn assert_no_overlaps(bookings: &[Booking]) {
    for (i, a) in bookings.iter().enumerate() {
        for b in &bookings[i + 1..] {
            if a.date == b.date {
                assert!(
                    !a.span().overlaps(&b.span()),
                    "bookings {} and {} overlap on {}",
                    a.id,
                    b.id,
                    a.date
                );
            }
        }
    }
}

// ── Pure conflict checks ─────────────────────────────────

fn stored(id: BookingId, start: &str, end: &str) -> Booking {
    draft("x", "2024-01-01", start, end)
        .validate()
        .unwrap()
        .into_booking(id, chrono::Utc::now())
}

#[test]
fn conflict_detects_partial_and_nested_overlap() {
    let existing = vec![stored(1, "10:00", "11:00")];
    let partial = Span::new(t("10:30"), t("11:30"));
    let nested = Span::new(t("10:15"), t("10:45"));
    let covering = Span::new(t("09:00"), t("12:00"));
    assert_eq!(find_conflict(&existing, &partial, None).map(|b| b.id), Some(1));
    assert_eq!(find_conflict(&existing, &nested, None).map(|b| b.id), Some(1));
    assert_eq!(find_conflict(&existing, &covering, None).map(|b| b.id), Some(1));
}

#[test]
fn conflict_ignores_touching_boundaries() {
    let existing = vec![stored(1, "10:00", "11:00")];
    assert!(find_conflict(&existing, &Span::new(t("11:00"), t("12:00")), None).is_none());
    assert!(find_conflict(&existing, &Span::new(t("09:00"), t("10:00")), None).is_none());
}

#[test]
fn conflict_excludes_self() {
    let existing = vec![stored(5, "09:00", "10:00"), stored(6, "11:00", "12:00")];
    let span = Span::new(t("09:30"), t("10:30"));
    assert!(find_conflict(&existing, &span, Some(5)).is_none());
    let span = Span::new(t("09:30"), t("11:30"));
    assert_eq!(find_conflict(&existing, &span, Some(5)).map(|b| b.id), Some(6));
}

// ── Scheduler ────────────────────────────────────────────

#[tokio::test]
async fn boundary_bookings_both_admitted() {
    let s = scheduler();
    assert_ok!(s.create(&draft("A", "2024-01-01", "10:00", "11:00")).await);
    assert_ok!(s.create(&draft("B", "2024-01-01", "11:00", "12:00")).await);
    assert_eq!(s.list_by_date(date("2024-01-01")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn nested_candidate_rejected() {
    let s = scheduler();
    let first = s.create(&draft("A", "2024-01-01", "10:00", "11:00")).await.unwrap();
    let result = s.create(&draft("B", "2024-01-01", "10:30", "10:45")).await;
    assert_eq!(result, Err(EngineError::Conflict { existing: first.id }));
    assert_eq!(s.list_all().await.unwrap(), vec![first]);
}

#[tokio::test]
async fn same_interval_on_other_date_is_fine() {
    let s = scheduler();
    assert_ok!(s.create(&draft("A", "2024-01-01", "10:00", "11:00")).await);
    assert_ok!(s.create(&draft("A", "2024-01-02", "10:00", "11:00")).await);
}

#[tokio::test]
async fn update_may_overlap_only_itself() {
    let s = scheduler();
    let b = s.create(&draft("A", "2024-01-01", "09:00", "10:00")).await.unwrap();

    let updated = s
        .update(b.id, &draft("A", "2024-01-01", "09:30", "10:30"))
        .await
        .unwrap();
    assert_eq!(updated.id, b.id);
    assert_eq!(updated.created_at, b.created_at);
    assert_eq!(updated.start_time, t("09:30"));
    assert_eq!(updated.end_time, t("10:30"));
}

#[tokio::test]
async fn update_into_other_booking_conflicts() {
    let s = scheduler();
    let a = s.create(&draft("A", "2024-01-01", "09:00", "10:00")).await.unwrap();
    let b = s.create(&draft("B", "2024-01-01", "10:00", "11:00")).await.unwrap();

    let result = s.update(a.id, &draft("A", "2024-01-01", "09:30", "10:30")).await;
    assert_eq!(result, Err(EngineError::Conflict { existing: b.id }));
    // unchanged
    assert_eq!(s.get(a.id).await.unwrap(), a);
}

#[tokio::test]
async fn update_moves_to_other_date() {
    let s = scheduler();
    let a = s.create(&draft("A", "2024-01-01", "09:00", "10:00")).await.unwrap();
    s.create(&draft("B", "2024-01-02", "13:00", "14:00")).await.unwrap();

    let moved = s.update(a.id, &draft("A", "2024-01-02", "09:00", "10:00")).await.unwrap();
    assert_eq!(moved.date, date("2024-01-02"));
    assert!(s.list_by_date(date("2024-01-01")).await.unwrap().is_empty());
    assert_eq!(s.list_by_date(date("2024-01-02")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn update_missing_is_not_found() {
    let s = scheduler();
    let result = s.update(99, &draft("A", "2024-01-01", "09:00", "10:00")).await;
    assert_eq!(result, Err(EngineError::NotFound(99)));
}

#[tokio::test]
async fn delete_then_slot_is_free() {
    let s = scheduler();
    let a = s.create(&draft("A", "2024-01-01", "09:00", "10:00")).await.unwrap();
    assert_err!(s.create(&draft("B", "2024-01-01", "09:30", "09:45")).await);
    assert_ok!(s.delete(a.id).await);
    assert_eq!(s.delete(a.id).await, Err(EngineError::NotFound(a.id)));
    assert_ok!(s.create(&draft("B", "2024-01-01", "09:30", "09:45")).await);
}

#[tokio::test]
async fn list_orders_by_start_then_id() {
    let s = scheduler();
    s.create(&draft("late", "2024-01-01", "15:00", "16:00")).await.unwrap();
    s.create(&draft("early", "2024-01-01", "08:00", "09:00")).await.unwrap();
    s.create(&draft("other day", "2023-12-31", "18:00", "19:00")).await.unwrap();

    let day: Vec<String> = s
        .list_by_date(date("2024-01-01"))
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.title)
        .collect();
    assert_eq!(day, ["early", "late"]);

    let all: Vec<String> = s.list_all().await.unwrap().into_iter().map(|b| b.title).collect();
    assert_eq!(all, ["other day", "early", "late"]);
}

#[tokio::test]
async fn repeated_reads_are_identical() {
    let s = scheduler();
    s.create(&draft("A", "2024-01-01", "09:00", "10:00")).await.unwrap();
    s.create(&draft("B", "2024-01-01", "11:00", "12:00")).await.unwrap();
    let first = s.list_by_date(date("2024-01-01")).await.unwrap();
    let second = s.list_by_date(date("2024-01-01")).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn scenario_standup_and_sync() {
    let s = scheduler();
    let standup = s
        .create(&draft("Standup", "2024-03-01", "09:00", "09:30"))
        .await
        .unwrap();
    assert_eq!(standup.id, 1);

    let sync = draft("Sync", "2024-03-01", "09:15", "09:45");
    assert_eq!(
        s.create(&sync).await,
        Err(EngineError::Conflict { existing: standup.id })
    );
    s.delete(standup.id).await.unwrap();
    let created = s.create(&sync).await.unwrap();
    assert_eq!(created.title, "Sync");
}

#[tokio::test]
async fn concurrent_overlapping_creates_admit_one() {
    let s = Arc::new(scheduler());
    let mut handles = Vec::new();
    for i in 0..32u16 {
        let s = s.clone();
        // every candidate covers 10:00-10:05
        let start = format!("{:02}:{:02}", 9 + (i % 2), if i % 2 == 0 { 30 } else { 0 });
        handles.push(tokio::spawn(async move {
            s.create(&draft("race", "2024-05-05", &start, "10:05")).await
        }));
    }
    let mut admitted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(EngineError::Conflict { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_no_overlaps(&s.list_all().await.unwrap());
    assert_eq!(s.locked_dates(), 0);
}

#[tokio::test]
async fn random_workload_never_overlaps() {
    let s = Arc::new(scheduler());
    let mut handles = Vec::new();
    for i in 0..200u32 {
        let s = s.clone();
        handles.push(tokio::spawn(async move {
            // deterministic spread of starts and lengths over three days
            let day = 1 + i % 3;
            let start = (i * 37) % (22 * 60);
            let len = 15 + (i * 13) % 120;
            let end = (start + len).min(24 * 60);
            let fmt = |m: u32| format!("{:02}:{:02}", m / 60, m % 60);
            let _ = s
                .create(&draft("w", &format!("2024-07-0{day}"), &fmt(start), &fmt(end)))
                .await;
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    let all = s.list_all().await.unwrap();
    assert!(!all.is_empty());
    assert_no_overlaps(&all);
}

// ── Validation never reaches the store ───────────────────

/// Store that counts calls and delegates to memory.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

#[async_trait]
impl BookingStore for CountingStore {
    async fn insert(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(booking).await
    }
    async fn query_by_date(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query_by_date(date).await
    }
    async fn query_all(&self) -> Result<Vec<Booking>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query_all().await
    }
    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id).await
    }
    async fn update_by_id(
        &self,
        id: BookingId,
        booking: NewBooking,
    ) -> Result<Option<Booking>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.update_by_id(id, booking).await
    }
    async fn delete_by_id(&self, id: BookingId) -> Result<u64, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_by_id(id).await
    }
    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn inverted_range_never_reaches_store() {
    let store = Arc::new(CountingStore::default());
    let s = Scheduler::new(store.clone(), DEFAULT_STORE_TIMEOUT);

    let result = s.create(&draft("bad", "2024-01-01", "11:00", "10:00")).await;
    assert_eq!(
        result,
        Err(EngineError::Validation(ValidationError::InvalidTimeRange))
    );
    let result = s.update(1, &draft("", "2024-01-01", "09:00", "10:00")).await;
    assert_eq!(
        result,
        Err(EngineError::Validation(ValidationError::MissingFields))
    );
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

// ── Store failures ───────────────────────────────────────

/// Store whose every call hangs or fails.
struct BrokenStore {
    hang: bool,
}

impl BrokenStore {
    async fn fail<T>(&self) -> Result<T, StoreError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        Err(StoreError::Io("connection refused".into()))
    }
}

#[async_trait]
impl BookingStore for BrokenStore {
    async fn insert(&self, _: NewBooking) -> Result<Booking, StoreError> {
        self.fail().await
    }
    async fn query_by_date(&self, _: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        self.fail().await
    }
    async fn query_all(&self) -> Result<Vec<Booking>, StoreError> {
        self.fail().await
    }
    async fn get(&self, _: BookingId) -> Result<Option<Booking>, StoreError> {
        self.fail().await
    }
    async fn update_by_id(&self, _: BookingId, _: NewBooking) -> Result<Option<Booking>, StoreError> {
        self.fail().await
    }
    async fn delete_by_id(&self, _: BookingId) -> Result<u64, StoreError> {
        self.fail().await
    }
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn store_errors_surface_as_unavailable() {
    let s = Scheduler::new(Arc::new(BrokenStore { hang: false }), DEFAULT_STORE_TIMEOUT);
    assert!(matches!(
        s.create(&draft("A", "2024-01-01", "09:00", "10:00")).await,
        Err(EngineError::StoreUnavailable(_))
    ));
    assert!(matches!(s.list_all().await, Err(EngineError::StoreUnavailable(_))));
    assert!(matches!(s.delete(1).await, Err(EngineError::StoreUnavailable(_))));
    assert_eq!(s.locked_dates(), 0);
}

#[tokio::test]
async fn hung_store_times_out() {
    let s = Scheduler::new(
        Arc::new(BrokenStore { hang: true }),
        Duration::from_millis(20),
    );
    match s.list_by_date(date("2024-01-01")).await {
        Err(EngineError::StoreUnavailable(msg)) => assert!(msg.contains("timed out"), "{msg}"),
        other => panic!("expected timeout, got {other:?}"),
    }
}

// ── Abandoned writes ─────────────────────────────────────

/// Memory store whose inserts take `delay` to land.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl BookingStore for SlowStore {
    async fn insert(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert(booking).await
    }
    async fn query_by_date(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        self.inner.query_by_date(date).await
    }
    async fn query_all(&self) -> Result<Vec<Booking>, StoreError> {
        self.inner.query_all().await
    }
    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.inner.get(id).await
    }
    async fn update_by_id(
        &self,
        id: BookingId,
        booking: NewBooking,
    ) -> Result<Option<Booking>, StoreError> {
        self.inner.update_by_id(id, booking).await
    }
    async fn delete_by_id(&self, id: BookingId) -> Result<u64, StoreError> {
        self.inner.delete_by_id(id).await
    }
    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn dropped_create_still_blocks_overlap() {
    let s = Scheduler::new(
        Arc::new(SlowStore::new(Duration::from_millis(50))),
        DEFAULT_STORE_TIMEOUT,
    );

    // Give up on the create as soon as it first yields.
    let standup = draft("Standup", "2024-03-01", "09:00", "09:30");
    let first = tokio::select! {
        biased;
        r = s.create(&standup) => Some(r),
        _ = std::future::ready(()) => None,
    };
    assert!(first.is_none(), "insert should still be in flight");

    let sync = s.create(&draft("Sync", "2024-03-01", "09:15", "09:45")).await;
    assert!(matches!(sync, Err(EngineError::Conflict { existing: 1 })), "{sync:?}");

    let day = assert_ok!(s.list_by_date(date("2024-03-01")).await);
    assert_eq!(day.len(), 1);
    assert_eq!(day[0].title, "Standup");
    assert_eq!(s.locked_dates(), 0);
}

#[tokio::test]
async fn timed_out_create_holds_date_until_it_lands() {
    let s = Scheduler::new(
        Arc::new(SlowStore::new(Duration::from_millis(100))),
        Duration::from_millis(20),
    );

    let first = s.create(&draft("Standup", "2024-03-01", "09:00", "09:30")).await;
    match first {
        Err(EngineError::StoreUnavailable(msg)) => assert!(msg.contains("timed out"), "{msg}"),
        other => panic!("expected timeout, got {other:?}"),
    }

    // The slow insert is still running and owns the date lock, so this waits
    // for it and then sees the booking.
    let sync = s.create(&draft("Sync", "2024-03-01", "09:15", "09:45")).await;
    assert!(matches!(sync, Err(EngineError::Conflict { existing: 1 })), "{sync:?}");
    assert_no_overlaps(&assert_ok!(s.list_all().await));
}
