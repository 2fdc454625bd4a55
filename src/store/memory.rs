//! In-process repositories, used by tests and ephemeral runs.
//!
//! Both types are cheap to clone and clones share state, so a test can keep
//! a handle to the same store across a simulated restart.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{DedupRepository, SubscriptionRepository};
use crate::error::PersistenceError;
use crate::source::ItemKey;
use crate::subscription::{Subscription, SubscriptionId};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionRepository {
    subs: Arc<Mutex<BTreeMap<SubscriptionId, Subscription>>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<Subscription> {
        lock(&self.subs).get(id).cloned()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn add(&self, sub: &Subscription) -> Result<(), PersistenceError> {
        lock(&self.subs).insert(sub.id.clone(), sub.clone());
        Ok(())
    }

    async fn update(&self, sub: &Subscription) -> Result<(), PersistenceError> {
        lock(&self.subs).insert(sub.id.clone(), sub.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Subscription>, PersistenceError> {
        Ok(lock(&self.subs).values().cloned().collect())
    }

    async fn remove(&self, id: &SubscriptionId) -> Result<(), PersistenceError> {
        lock(&self.subs).remove(id);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDedupRepository {
    seen: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryDedupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.seen).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupRepository for InMemoryDedupRepository {
    async fn has(&self, item: &ItemKey, subscription: &SubscriptionId) -> Result<bool, PersistenceError> {
        Ok(lock(&self.seen).contains(&item.seen_key(subscription)))
    }

    async fn add(&self, item: &ItemKey, subscription: &SubscriptionId) -> Result<(), PersistenceError> {
        lock(&self.seen).insert(item.seen_key(subscription));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedup_is_scoped_per_subscription() {
        let repo = InMemoryDedupRepository::new();
        let item = ItemKey::new("ria", "1");
        let a = SubscriptionId::from("a");
        let b = SubscriptionId::from("b");

        repo.add(&item, &a).await.unwrap();
        repo.add(&item, &a).await.unwrap();

        assert!(repo.has(&item, &a).await.unwrap());
        assert!(!repo.has(&item, &b).await.unwrap());
        assert_eq!(repo.len(), 1, "add is idempotent");
    }

    #[tokio::test]
    async fn subscription_update_replaces_by_id() {
        let repo = InMemorySubscriptionRepository::new();
        let mut sub = Subscription::listing(1, "https://example.com/list");
        repo.add(&sub).await.unwrap();

        sub.last_update = Some(chrono::Utc::now());
        repo.update(&sub).await.unwrap();

        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].last_update.is_some());

        repo.remove(&sub.id).await.unwrap();
        repo.remove(&sub.id).await.unwrap();
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let repo = InMemorySubscriptionRepository::new();
        let other = repo.clone();
        let sub = Subscription::listing(1, "https://example.com/list");
        repo.add(&sub).await.unwrap();
        assert_eq!(other.get(&sub.id), Some(sub));
    }
}
