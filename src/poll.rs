//! The poll cycle and the background polling loop.
//!
//! One cycle is: fetch the current items, skip the ones already recorded for
//! this subscription, notify the rest (up to an optional cap), and record
//! every new item as seen whether or not it was sent.  The loop runs one
//! cycle, persists the subscription's refreshed metadata, sleeps, and
//! repeats until its cancellation token fires.
//!
//! A freshly created subscription starts with a capped creation cycle
//! inside the same task ([`run_created_task`]), so stopping the task also
//! stops that first cycle.
//!
//! Cancellation is observed while fetching and while sleeping, and between
//! items.  It is never observed between notifying an item and recording it,
//! so a stopped task cannot leave a delivered item unrecorded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FetchError, PersistenceError};
use crate::notify::Notifier;
use crate::source::{Notification, Observed, Reader};
use crate::store::{DedupRepository, SubscriptionRepository};
use crate::subscription::Subscription;

/// Everything needed to poll one subscription: its Reader, the seen-item
/// store of its source type, and the failure policy of that source type.
/// Item formatting comes with the item type through [`Observed::render`].
pub struct Pipeline<I: Observed> {
    reader: Box<dyn Reader<Item = I>>,
    seen: Arc<dyn DedupRepository>,
    /// Tell the subscriber when a fetch fails (stale sessions need their
    /// attention).
    report_fetch_failures: bool,
}

impl<I: Observed> Pipeline<I> {
    pub fn new(reader: Box<dyn Reader<Item = I>>, seen: Arc<dyn DedupRepository>, report_fetch_failures: bool) -> Self {
        Self {
            reader,
            seen,
            report_fetch_failures,
        }
    }

    /// Whether failed fetches are reported to the subscriber.
    pub fn reports_fetch_failures(&self) -> bool {
        self.report_fetch_failures
    }
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    /// Items not seen before this cycle.
    pub new: usize,
    pub sent: usize,
    pub session_id: Option<String>,
}

#[derive(Debug)]
pub enum CycleError {
    Fetch(FetchError),
    Persistence(PersistenceError),
    Cancelled,
}

impl From<PersistenceError> for CycleError {
    fn from(e: PersistenceError) -> Self {
        CycleError::Persistence(e)
    }
}

/// Run one fetch → dedup → notify → mark-seen pass.
///
/// `limit` caps how many notifications this cycle may send; items over the
/// cap are still recorded as seen and will never be sent.
pub async fn run_cycle<I: Observed>(
    pipeline: &mut Pipeline<I>,
    sub: &Subscription,
    notifier: &dyn Notifier,
    limit: Option<usize>,
    cancel: &CancellationToken,
) -> Result<CycleReport, CycleError> {
    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(CycleError::Cancelled),
        res = pipeline.reader.fetch() => res.map_err(CycleError::Fetch)?,
    };

    let mut report = CycleReport {
        fetched: fetched.items.len(),
        new: 0,
        sent: 0,
        session_id: fetched.session_id,
    };

    for item in fetched.items {
        if cancel.is_cancelled() {
            return Err(CycleError::Cancelled);
        }

        let key = item.key();
        if pipeline.seen.has(&key, &sub.id).await? {
            debug!(subscription = %sub.id, item = %key.item_id, "already seen");
            continue;
        }
        report.new += 1;

        if limit.map_or(true, |cap| report.sent < cap) {
            info!(
                subscription = %sub.id,
                subscriber = sub.subscriber_id,
                item = %key.item_id,
                "sending notification"
            );
            if let Err(e) = notifier.deliver(sub.subscriber_id, &item.render()).await {
                warn!(subscription = %sub.id, item = %key.item_id, error = %e, "delivery failed");
            }
            report.sent += 1;
        }

        pipeline.seen.add(&key, &sub.id).await?;
    }

    Ok(report)
}

/// Shared handles a polling task needs besides its own pipeline.
#[derive(Clone)]
pub struct TaskContext {
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub notifier: Arc<dyn Notifier>,
    pub interval: Duration,
}

/// Poll `sub` until `cancel` fires.
///
/// A failed cycle never ends the loop: the error is logged (and reported to
/// the subscriber when the pipeline asks for it) and the next cycle retries.
pub async fn run_task<I: Observed>(
    ctx: TaskContext,
    mut pipeline: Pipeline<I>,
    mut sub: Subscription,
    cancel: CancellationToken,
) {
    info!(subscription = %sub.id, kind = sub.source.kind(), "polling started");

    loop {
        match run_cycle(&mut pipeline, &sub, ctx.notifier.as_ref(), None, &cancel).await {
            Ok(report) => {
                debug!(
                    subscription = %sub.id,
                    fetched = report.fetched,
                    new = report.new,
                    "cycle complete"
                );
                if cancel.is_cancelled() {
                    break;
                }
                sub.record_poll(Utc::now(), report.session_id);
                if let Err(e) = ctx.subscriptions.update(&sub).await {
                    warn!(subscription = %sub.id, error = %e, "failed to persist subscription metadata");
                }
            }
            Err(CycleError::Cancelled) => break,
            Err(CycleError::Fetch(e)) => {
                warn!(subscription = %sub.id, error = %e, "failed to poll source");
                if pipeline.reports_fetch_failures() {
                    report_failure(ctx.notifier.as_ref(), &sub, &e).await;
                }
            }
            Err(CycleError::Persistence(e)) => {
                warn!(subscription = %sub.id, error = %e, "seen-item store unavailable, cycle skipped");
            }
        }

        if !pause(ctx.interval, &cancel).await {
            break;
        }
    }

    info!(subscription = %sub.id, "polling stopped");
}

/// Outcome of a creation cycle, handed back to whoever is creating the
/// subscription.
pub type Created = Result<Subscription, CycleError>;

/// Task body for a subscription that was just created.
///
/// Runs one cycle capped at `burst`, persists the refreshed metadata and
/// reports the result through `created`.  A failed or cancelled creation
/// cycle ends the task.  Otherwise the task waits one interval and carries
/// on as [`run_task`].
pub async fn run_created_task<I: Observed>(
    ctx: TaskContext,
    mut pipeline: Pipeline<I>,
    mut sub: Subscription,
    burst: usize,
    created: oneshot::Sender<Created>,
    cancel: CancellationToken,
) {
    match run_cycle(&mut pipeline, &sub, ctx.notifier.as_ref(), Some(burst), &cancel).await {
        Ok(report) => {
            info!(subscription = %sub.id, new = report.new, sent = report.sent, "first poll complete");
            sub.record_poll(Utc::now(), report.session_id);
            if let Err(e) = ctx.subscriptions.update(&sub).await {
                warn!(subscription = %sub.id, error = %e, "failed to persist subscription metadata");
            }
            let _ = created.send(Ok(sub.clone()));
        }
        Err(e) => {
            let _ = created.send(Err(e));
            return;
        }
    }

    if pause(ctx.interval, &cancel).await {
        run_task(ctx, pipeline, sub, cancel).await;
    }
}

/// Sleep for `interval`.  Returns `false` if `cancel` fired first.
async fn pause(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

/// Tell the subscriber their session-bearing subscription failed to poll.
pub async fn report_failure(notifier: &dyn Notifier, sub: &Subscription, error: &FetchError) {
    let msg = Notification::text(format!(
        "Subscription {} failed to fetch: {error}. The session may have expired; \
         unsubscribe and subscribe again with fresh tokens if this persists.",
        sub.id
    ));
    if let Err(e) = notifier.deliver(sub.subscriber_id, &msg).await {
        warn!(subscription = %sub.id, error = %e, "failed to report fetch failure");
    }
}
