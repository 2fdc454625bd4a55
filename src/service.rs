//! The subscription orchestrator.
//!
//! [`SubscriptionsService`] owns one background polling task per live
//! subscription and is the only component that creates, resumes and stops
//! them.  It exposes the three operations a front end needs (`add`, `list`,
//! `drop`) plus `shutdown`.
//!
//! ```text
//!  add ──► validate ──► persist ──► spawn task ──► burst cycle (cap) ──► sleep
//!                                                  │ fails: remove record  │
//!          ┌───────────────────────────────────────────────────────────────┘
//!          ▼
//!   fetch ─► dedup ─► notify ─► mark seen ─► persist metadata ─► sleep ─┐
//!     ▲                                                                 │
//!     └─────────────────────────────────────────────────────────────────┘
//!
//!  drop ──► cancel + join task ──► delete record
//! ```

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::error::{FetchError, ValidationError, WatchResult};
use crate::notify::Notifier;
use crate::poll::{self, CycleError, Pipeline, TaskContext};
use crate::registry::TaskRegistry;
use crate::source::{ListingItem, Observed, ReaderFactory, Slot};
use crate::store::{DedupRepository, SubscriptionRepository};
use crate::subscription::{Source, SubscriberId, Subscription, SubscriptionId};

/// Persistence handles, one seen-item store per source type.
#[derive(Clone)]
pub struct Stores {
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub listing_seen: Arc<dyn DedupRepository>,
    pub slots_seen: Arc<dyn DedupRepository>,
}

/// The pipeline selected for a subscription's source type.
enum Dispatch {
    Listing(Pipeline<ListingItem>),
    Slots(Pipeline<Slot>),
}

pub struct SubscriptionsService {
    stores: Stores,
    readers: Arc<dyn ReaderFactory>,
    notifier: Arc<dyn Notifier>,
    config: ServiceConfig,
    tasks: TaskRegistry,
}

impl SubscriptionsService {
    /// Build the service and resume a polling task for every stored
    /// subscription.  Resumed tasks get no creation burst.
    pub async fn start(
        stores: Stores,
        readers: Arc<dyn ReaderFactory>,
        notifier: Arc<dyn Notifier>,
        config: ServiceConfig,
    ) -> WatchResult<Self> {
        let service = Self {
            stores,
            readers,
            notifier,
            config,
            tasks: TaskRegistry::new(),
        };

        let stored = service.stores.subscriptions.list().await?;
        info!(count = stored.len(), "resuming subscriptions");
        for sub in stored {
            service.start_task(sub);
        }
        Ok(service)
    }

    /// Create a subscription.
    ///
    /// Persists it, then runs its first poll inside the subscription's own
    /// task, sending at most `creation_burst` notifications, and returns
    /// once that poll is done.  The task keeps polling afterwards.
    ///
    /// The first poll also checks that the source works: if it fails, the
    /// stored record is removed, no polling continues and the error is
    /// returned.  A subscription dropped while its first poll runs is
    /// returned as created and stays dropped.
    pub async fn add(&self, sub: Subscription) -> WatchResult<Subscription> {
        sub.validate()?;
        let stored = self.stores.subscriptions.list().await?;
        if stored.iter().any(|s| s.id == sub.id) || self.tasks.is_running(&sub.id) {
            return Err(ValidationError::DuplicateId(sub.id.to_string()).into());
        }

        let dispatch = self.dispatch(&sub.source)?;

        info!(subscription = %sub.id, subscriber = sub.subscriber_id, kind = sub.source.kind(), "adding subscription");
        self.stores.subscriptions.add(&sub).await?;

        let (created, outcome) = oneshot::channel();
        let spawned = match dispatch {
            Dispatch::Listing(pipeline) => self.spawn_created(pipeline, sub.clone(), created),
            Dispatch::Slots(pipeline) => self.spawn_created(pipeline, sub.clone(), created),
        };
        if !spawned {
            return Err(ValidationError::DuplicateId(sub.id.to_string()).into());
        }

        match outcome.await {
            Ok(Ok(sub)) => Ok(sub),
            Ok(Err(CycleError::Fetch(e))) => {
                warn!(subscription = %sub.id, error = %e, "first poll failed, subscription rejected");
                self.abandon(&sub.id).await;
                Err(e.into())
            }
            Ok(Err(CycleError::Persistence(e))) => {
                warn!(subscription = %sub.id, error = %e, "seen-item store unavailable, subscription rejected");
                self.abandon(&sub.id).await;
                Err(e.into())
            }
            Ok(Err(CycleError::Cancelled)) | Err(_) => {
                info!(subscription = %sub.id, "subscription stopped during its first poll");
                Ok(sub)
            }
        }
    }

    /// Every stored subscription of `subscriber`.
    pub async fn list(&self, subscriber: SubscriberId) -> WatchResult<Vec<Subscription>> {
        let all = self.stores.subscriptions.list().await?;
        Ok(all.into_iter().filter(|s| s.subscriber_id == subscriber).collect())
    }

    /// Stop polling `sub` and delete its record.
    ///
    /// The task is cancelled and joined before the record is deleted, so no
    /// notification for `sub` is sent after this returns and a late metadata
    /// write cannot resurrect the record.  Returns the last stored version
    /// of the record (carrying the latest session for slot sources).  If the
    /// delete fails, polling is resumed and the error is returned.
    pub async fn drop(&self, sub: &Subscription) -> WatchResult<Option<Subscription>> {
        let was_running = self.tasks.stop(&sub.id).await;

        let latest = match self.stores.subscriptions.list().await {
            Ok(all) => all.into_iter().find(|s| s.id == sub.id),
            Err(e) => {
                if was_running {
                    self.start_task(sub.clone());
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self.stores.subscriptions.remove(&sub.id).await {
            if was_running {
                self.start_task(latest.unwrap_or_else(|| sub.clone()));
            }
            return Err(e.into());
        }

        info!(subscription = %sub.id, "subscription dropped");
        Ok(latest)
    }

    /// Cancel every polling task and wait for all of them to finish.
    pub async fn shutdown(&self) {
        info!(running = self.tasks.len(), "stopping all subscriptions");
        self.tasks.shutdown().await;
    }

    /// Number of live polling tasks.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_polling(&self, id: &SubscriptionId) -> bool {
        self.tasks.is_running(id)
    }

    /// Single point where a source type picks its Reader, seen-item store and
    /// failure policy.
    fn dispatch(&self, source: &Source) -> Result<Dispatch, FetchError> {
        Ok(match source {
            Source::Listing(q) => Dispatch::Listing(Pipeline::new(
                self.readers.listing(q)?,
                self.stores.listing_seen.clone(),
                false,
            )),
            Source::Slots(q) => Dispatch::Slots(Pipeline::new(
                self.readers.slots(q)?,
                self.stores.slots_seen.clone(),
                true,
            )),
        })
    }

    /// Start background polling for `sub` unless it is already running.
    ///
    /// Returns whether a new task was spawned.
    pub(crate) fn start_task(&self, sub: Subscription) -> bool {
        if self.tasks.is_running(&sub.id) {
            return false;
        }
        match self.dispatch(&sub.source) {
            Ok(Dispatch::Listing(pipeline)) => self.spawn(pipeline, sub),
            Ok(Dispatch::Slots(pipeline)) => self.spawn(pipeline, sub),
            Err(e) => {
                error!(subscription = %sub.id, error = %e, "cannot build reader, subscription not polled");
                false
            }
        }
    }

    fn spawn<I: Observed>(&self, pipeline: Pipeline<I>, sub: Subscription) -> bool {
        let ctx = self.task_context();
        self.tasks
            .spawn(sub.id.clone(), move |cancel| poll::run_task(ctx, pipeline, sub, cancel))
            .is_some()
    }

    fn spawn_created<I: Observed>(
        &self,
        pipeline: Pipeline<I>,
        sub: Subscription,
        created: oneshot::Sender<poll::Created>,
    ) -> bool {
        let ctx = self.task_context();
        let burst = self.config.creation_burst;
        self.tasks
            .spawn(sub.id.clone(), move |cancel| {
                poll::run_created_task(ctx, pipeline, sub, burst, created, cancel)
            })
            .is_some()
    }

    /// Undo a creation whose first poll failed.
    async fn abandon(&self, id: &SubscriptionId) {
        self.tasks.stop(id).await;
        if let Err(e) = self.stores.subscriptions.remove(id).await {
            error!(subscription = %id, error = %e, "failed to remove rejected subscription");
        }
    }

    fn task_context(&self) -> TaskContext {
        TaskContext {
            subscriptions: self.stores.subscriptions.clone(),
            notifier: self.notifier.clone(),
            interval: self.config.poll_interval,
        }
    }
}
