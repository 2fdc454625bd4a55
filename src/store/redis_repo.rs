//! Redis-backed repositories.
//!
//! Subscriptions live in one hash (`{prefix}:subscriptions`, field = id,
//! value = JSON record) so `update` is a single per-key `HSET`.  Seen items
//! live in one set per source type (`{prefix}:seen:{kind}`) whose members
//! are the composite `sourceTag|itemId|subscriptionId` keys.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::warn;

use super::{DedupRepository, SubscriptionRepository};
use crate::error::PersistenceError;
use crate::source::ItemKey;
use crate::subscription::{Subscription, SubscriptionId};

#[derive(Clone)]
pub struct RedisSubscriptionRepository {
    conn: MultiplexedConnection,
    key: String,
}

impl RedisSubscriptionRepository {
    pub fn new(conn: MultiplexedConnection, prefix: &str) -> Self {
        Self {
            conn,
            key: subscriptions_key(prefix),
        }
    }

    async fn store(&self, sub: &Subscription) -> Result<(), PersistenceError> {
        let record = serde_json::to_string(sub)?;
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(&self.key, sub.id.as_str(), record).await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for RedisSubscriptionRepository {
    async fn add(&self, sub: &Subscription) -> Result<(), PersistenceError> {
        self.store(sub).await
    }

    async fn update(&self, sub: &Subscription) -> Result<(), PersistenceError> {
        self.store(sub).await
    }

    async fn list(&self) -> Result<Vec<Subscription>, PersistenceError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(&self.key).await?;
        Ok(decode_records(raw))
    }

    async fn remove(&self, id: &SubscriptionId) -> Result<(), PersistenceError> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(&self.key, id.as_str()).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisDedupRepository {
    conn: MultiplexedConnection,
    key: String,
}

impl RedisDedupRepository {
    /// Seen-item store for one source type (`"listing"`, `"slots"`).
    pub fn new(conn: MultiplexedConnection, prefix: &str, kind: &str) -> Self {
        Self {
            conn,
            key: seen_key(prefix, kind),
        }
    }
}

#[async_trait]
impl DedupRepository for RedisDedupRepository {
    async fn has(&self, item: &ItemKey, subscription: &SubscriptionId) -> Result<bool, PersistenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(&self.key, item.seen_key(subscription)).await?)
    }

    async fn add(&self, item: &ItemKey, subscription: &SubscriptionId) -> Result<(), PersistenceError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(&self.key, item.seen_key(subscription)).await?;
        Ok(())
    }
}

fn subscriptions_key(prefix: &str) -> String {
    format!("{prefix}:subscriptions")
}

fn seen_key(prefix: &str, kind: &str) -> String {
    format!("{prefix}:seen:{kind}")
}

/// Decode stored records, skipping any that no longer parse so that one bad
/// record cannot block startup resumption of the others.
fn decode_records(raw: Vec<String>) -> Vec<Subscription> {
    raw.into_iter()
        .filter_map(|record| match serde_json::from_str::<Subscription>(&record) {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!(error = %e, "skipping undecodable subscription record");
                None
            }
        })
        .collect()
}
