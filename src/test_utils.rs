//! Shared test doubles: scripted upstreams, a Reader factory over them, a
//! notifier that records every delivery and stores that fail on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{DeliveryError, FetchError, PersistenceError};
use crate::notify::Notifier;
use crate::source::{Fetched, ItemKey, ListingItem, Notification, Reader, ReaderFactory, Slot};
use crate::store::{
    DedupRepository, InMemoryDedupRepository, InMemorySubscriptionRepository, SubscriptionRepository,
};
use crate::subscription::{ListingQuery, SessionTokens, SlotQuery, SubscriberId, Subscription, SubscriptionId};

pub fn listing_item(id: &str) -> ListingItem {
    ListingItem {
        provider: "ria".to_string(),
        id: id.to_string(),
        title: format!("Car {id}"),
        year: None,
        price_usd: None,
        price_uah: None,
        mileage_km: None,
        link: None,
        image_url: None,
        published: None,
    }
}

pub fn slot(id: &str) -> Slot {
    Slot {
        id: id.to_string(),
        office_id: "142".to_string(),
        time: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap().and_hms_opt(9, 0, 0).unwrap(),
    }
}

pub fn slot_query() -> SlotQuery {
    SlotQuery {
        office_id: "142".into(),
        date_start: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
        date_end: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
        session: SessionTokens {
            identity: "ident".into(),
            csrf: "csrf".into(),
            csrf_header: "header".into(),
            session_id: "sess-0".into(),
        },
    }
}

/// A fake upstream source whose contents the test controls.
pub struct Upstream<I> {
    items: Mutex<Vec<I>>,
    failures_left: AtomicUsize,
    hang: AtomicBool,
    delay: Mutex<Duration>,
    fetches: AtomicUsize,
}

impl<I: Clone> Upstream<I> {
    pub fn new(items: Vec<I>) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items),
            failures_left: AtomicUsize::new(0),
            hang: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, item: I) {
        self.items.lock().unwrap().push(item);
    }

    /// Make the next `n` fetches fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Make every following fetch block forever.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    /// Make every following fetch take `delay` before answering.
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn fetch(&self) -> Result<Vec<I>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FetchError::Http("connection reset".into()));
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

struct FakeListingReader(Arc<Upstream<ListingItem>>);

#[async_trait]
impl Reader for FakeListingReader {
    type Item = ListingItem;

    async fn fetch(&mut self) -> Result<Fetched<ListingItem>, FetchError> {
        Ok(Fetched::items(self.0.fetch().await?))
    }
}

/// Rotates its session id on every successful fetch: `sess-1`, `sess-2`, ...
struct FakeSlotReader {
    upstream: Arc<Upstream<Slot>>,
    rotations: usize,
}

#[async_trait]
impl Reader for FakeSlotReader {
    type Item = Slot;

    async fn fetch(&mut self) -> Result<Fetched<Slot>, FetchError> {
        let items = self.upstream.fetch().await?;
        self.rotations += 1;
        Ok(Fetched {
            items,
            session_id: Some(format!("sess-{}", self.rotations)),
        })
    }
}

/// Hands out fake Readers: listing upstreams keyed by URL, one slot upstream.
#[derive(Default)]
pub struct FakeFactory {
    listings: Mutex<HashMap<String, Arc<Upstream<ListingItem>>>>,
    slots: Mutex<Option<Arc<Upstream<Slot>>>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_listing(&self, url: &str, upstream: Arc<Upstream<ListingItem>>) {
        self.listings.lock().unwrap().insert(url.to_string(), upstream);
    }

    pub fn with_slots(&self, upstream: Arc<Upstream<Slot>>) {
        *self.slots.lock().unwrap() = Some(upstream);
    }
}

impl ReaderFactory for FakeFactory {
    fn listing(&self, query: &ListingQuery) -> Result<Box<dyn Reader<Item = ListingItem>>, FetchError> {
        let upstream = self
            .listings
            .lock()
            .unwrap()
            .entry(query.url.clone())
            .or_insert_with(|| Upstream::new(Vec::new()))
            .clone();
        Ok(Box::new(FakeListingReader(upstream)))
    }

    fn slots(&self, _query: &SlotQuery) -> Result<Box<dyn Reader<Item = Slot>>, FetchError> {
        let upstream = self
            .slots
            .lock()
            .unwrap()
            .get_or_insert_with(|| Upstream::new(Vec::new()))
            .clone();
        Ok(Box::new(FakeSlotReader { upstream, rotations: 0 }))
    }
}

/// Records deliveries instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(SubscriberId, Notification)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_to(&self, subscriber: SubscriberId) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == subscriber)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Texts delivered to `subscriber`, in order.
    pub fn texts(&self, subscriber: SubscriberId) -> Vec<String> {
        self.sent_to(subscriber).into_iter().map(|n| n.text).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, subscriber: SubscriberId, content: &Notification) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push((subscriber, content.clone()));
        Ok(())
    }
}

fn unavailable() -> PersistenceError {
    PersistenceError::Redis(redis::RedisError::from((redis::ErrorKind::IoError, "store unavailable")))
}

/// In-memory subscription store whose writes can be switched to failing.
#[derive(Clone, Default)]
pub struct FlakySubscriptions {
    inner: InMemorySubscriptionRepository,
    fail_add: Arc<AtomicBool>,
    fail_update: Arc<AtomicBool>,
    fail_remove: Arc<AtomicBool>,
}

impl FlakySubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.inner.get(id)
    }

    pub fn fail_add(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriptionRepository for FlakySubscriptions {
    async fn add(&self, sub: &Subscription) -> Result<(), PersistenceError> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.add(sub).await
    }

    async fn update(&self, sub: &Subscription) -> Result<(), PersistenceError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.update(sub).await
    }

    async fn list(&self) -> Result<Vec<Subscription>, PersistenceError> {
        self.inner.list().await
    }

    async fn remove(&self, id: &SubscriptionId) -> Result<(), PersistenceError> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.remove(id).await
    }
}

/// In-memory seen-item store whose next lookups can be made to fail.
#[derive(Clone, Default)]
pub struct FlakySeen {
    inner: InMemoryDedupRepository,
    failures_left: Arc<AtomicUsize>,
}

impl FlakySeen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` lookups fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl DedupRepository for FlakySeen {
    async fn has(&self, item: &ItemKey, subscription: &SubscriptionId) -> Result<bool, PersistenceError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(unavailable());
        }
        self.inner.has(item, subscription).await
    }

    async fn add(&self, item: &ItemKey, subscription: &SubscriptionId) -> Result<(), PersistenceError> {
        self.inner.add(item, subscription).await
    }
}
