//! Source abstraction layer.
//!
//! This module defines the [`Reader`] trait that every watched source
//! implements, the [`Observed`] trait that makes an item deduplicable and
//! renderable, and the [`ReaderFactory`] the orchestrator uses to build a
//! Reader for a subscription.  Concrete sources live in sub-modules:
//! [`listing`] (listing pages and RSS feeds) and [`slots`] (the
//! session-bearing appointment-slot system).
//!
//! ## Adding a new source
//!
//! 1. Add a variant to [`crate::subscription::Source`] carrying its query.
//! 2. Create a new file in this directory with an item type implementing
//!    [`Observed`] and a reader implementing [`Reader`].
//! 3. Add a constructor to [`ReaderFactory`] and one match arm in the
//!    orchestrator's `dispatch`.
//!
//! The poll cycle, de-duplication and task lifecycle are source-agnostic.

mod listing;
mod listing_item;
pub mod slots;

pub use listing::ListingReader;
pub use listing_item::ListingItem;
pub use slots::{Slot, SlotReader, SlotsEndpoint};

use async_trait::async_trait;

use crate::error::FetchError;
use crate::subscription::{ListingQuery, SlotQuery, SubscriptionId};

/// Stable identity of an upstream item: provider tag plus provider item id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub source_tag: String,
    pub item_id: String,
}

impl ItemKey {
    pub fn new(source_tag: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
            item_id: item_id.into(),
        }
    }

    /// Composite seen-item key `sourceTag|itemId|subscriptionId`.
    ///
    /// Including the subscription id is what scopes de-duplication to one
    /// subscription rather than to the whole process.
    pub fn seen_key(&self, subscription: &SubscriptionId) -> String {
        format!("{}|{}|{}", self.source_tag, self.item_id, subscription)
    }
}

/// Rendered message handed to a [`crate::notify::Notifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// HTML-formatted body (or caption when an image is attached).
    pub text: String,
    pub image_url: Option<String>,
}

impl Notification {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_url: None,
        }
    }
}

/// An item the orchestrator can de-duplicate and announce.
pub trait Observed: Send + Sync + 'static {
    fn key(&self) -> ItemKey;

    /// Format this item for the subscriber.
    fn render(&self) -> Notification;
}

/// Result of one successful fetch.
#[derive(Debug, Clone)]
pub struct Fetched<I> {
    /// Items in upstream order.
    pub items: Vec<I>,
    /// Session id after the call, for sources whose session rotates.
    pub session_id: Option<String>,
}

impl<I> Fetched<I> {
    pub fn items(items: Vec<I>) -> Self {
        Self {
            items,
            session_id: None,
        }
    }
}

/// Trait that every watched source implements.
///
/// A Reader is owned by exactly one background task, so `fetch` takes
/// `&mut self` and implementations may keep session state between calls.
/// On any transport or parse problem `fetch` must fail as a whole rather
/// than return a partial item list.
#[async_trait]
pub trait Reader: Send {
    type Item: Observed;

    async fn fetch(&mut self) -> Result<Fetched<Self::Item>, FetchError>;
}

/// Builds Readers for subscription queries.
///
/// Kept behind a trait so tests can hand the orchestrator scripted Readers.
pub trait ReaderFactory: Send + Sync {
    fn listing(&self, query: &ListingQuery) -> Result<Box<dyn Reader<Item = ListingItem>>, FetchError>;

    fn slots(&self, query: &SlotQuery) -> Result<Box<dyn Reader<Item = Slot>>, FetchError>;
}

/// Production factory: real HTTP Readers.
#[derive(Debug, Clone, Default)]
pub struct HttpReaderFactory {
    pub slots_endpoint: SlotsEndpoint,
}

impl HttpReaderFactory {
    pub fn new(slots_endpoint: SlotsEndpoint) -> Self {
        Self { slots_endpoint }
    }
}

impl ReaderFactory for HttpReaderFactory {
    fn listing(&self, query: &ListingQuery) -> Result<Box<dyn Reader<Item = ListingItem>>, FetchError> {
        Ok(Box::new(ListingReader::new(&query.url)?))
    }

    fn slots(&self, query: &SlotQuery) -> Result<Box<dyn Reader<Item = Slot>>, FetchError> {
        Ok(Box::new(SlotReader::new(query, self.slots_endpoint.clone())?))
    }
}
