//! Persistence boundaries.
//!
//! Two repositories sit behind async traits: [`SubscriptionRepository`]
//! keeps subscription records across restarts and [`DedupRepository`]
//! remembers which items were already delivered to which subscription.
//! Every background task only touches keys of its own subscription, so
//! implementations need per-key atomicity and nothing more.

mod memory;
mod redis_repo;

pub use memory::{InMemoryDedupRepository, InMemorySubscriptionRepository};
pub use redis_repo::{RedisDedupRepository, RedisSubscriptionRepository};

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::source::ItemKey;
use crate::subscription::{Subscription, SubscriptionId};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn add(&self, sub: &Subscription) -> Result<(), PersistenceError>;

    /// Replace the stored record with the same id.
    async fn update(&self, sub: &Subscription) -> Result<(), PersistenceError>;

    async fn list(&self) -> Result<Vec<Subscription>, PersistenceError>;

    /// Remove the record for `id`.  Removing a missing record is not an error.
    async fn remove(&self, id: &SubscriptionId) -> Result<(), PersistenceError>;
}

/// Set of `(item, subscription)` pairs that were already delivered.
#[async_trait]
pub trait DedupRepository: Send + Sync {
    async fn has(&self, item: &ItemKey, subscription: &SubscriptionId) -> Result<bool, PersistenceError>;

    /// Record the pair.  Idempotent.
    async fn add(&self, item: &ItemKey, subscription: &SubscriptionId) -> Result<(), PersistenceError>;
}
