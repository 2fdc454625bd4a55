//! Supervised registry of background polling tasks.
//!
//! Holds at most one live task per subscription id.  Each task gets its own
//! [`CancellationToken`]; stopping a task cancels the token and then awaits
//! the join handle, so once [`TaskRegistry::stop`] or
//! [`TaskRegistry::shutdown`] returns the task's future has been dropped and
//! can no longer deliver anything.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::subscription::SubscriptionId;

struct TaskHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    async fn join(self, id: &SubscriptionId) {
        match self.join.await {
            Ok(()) => debug!(subscription = %id, "task stopped"),
            Err(e) if e.is_panic() => warn!(subscription = %id, "task panicked before stop"),
            Err(_) => {}
        }
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    // Never held across an await.
    tasks: Mutex<HashMap<SubscriptionId, TaskHandle>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, TaskHandle>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `task` for `id` unless a live task already exists for it.
    ///
    /// Returns the new task's cancellation token, or `None` when the call
    /// was a no-op.  A registered task that has already finished (it can
    /// only end by panicking) is replaced.
    pub fn spawn<F, Fut>(&self, id: SubscriptionId, task: F) -> Option<CancellationToken>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        if tasks.get(&id).is_some_and(|h| !h.join.is_finished()) {
            debug!(subscription = %id, "task already running");
            return None;
        }
        let cancel = CancellationToken::new();
        let join = tokio::spawn(task(cancel.clone()));
        tasks.insert(
            id,
            TaskHandle {
                cancel: cancel.clone(),
                join,
            },
        );
        Some(cancel)
    }

    pub fn is_running(&self, id: &SubscriptionId) -> bool {
        self.lock().get(id).is_some_and(|h| !h.join.is_finished())
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|h| !h.join.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel the task for `id` and wait until it has terminated.
    ///
    /// Returns `false` if no task was registered.
    pub async fn stop(&self, id: &SubscriptionId) -> bool {
        let handle = self.lock().remove(id);
        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                handle.join(id).await;
                true
            }
            None => false,
        }
    }

    /// Cancel every task, then wait for all of them.
    pub async fn shutdown(&self) {
        let mut handles: Vec<_> = self.lock().drain().collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        for (id, handle) in handles {
            handle.join(&id).await;
        }
    }
}
