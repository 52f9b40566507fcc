//! Extended event lifetimes.
//!
//! Every handler hands its asynchronous tail to an [`ExtendedLifetime`]. The worker
//! counts as busy until all tracked work has finished, and [`ExtendedLifetime::settle`]
//! lets the host wait for that point before it shuts the worker down.

use std::future::Future;
use std::time::Duration;

use powerfit_common::with_timeout;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::events::EventSender;

/// Tracker for work that must outlive the event that started it.
#[derive(Debug, Clone)]
pub struct ExtendedLifetime {
    tracker: TaskTracker,
    events: EventSender,
    timeout: Duration,
}

impl ExtendedLifetime {
    /// Each tracked unit is bounded by `timeout`.
    pub fn new(events: EventSender, timeout: Duration) -> Self {
        Self {
            tracker: TaskTracker::new(),
            events,
            timeout,
        }
    }

    /// Keep the worker alive until `work` completes; failures go to the host.
    pub fn wait_until<F, E>(&self, label: &'static str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        let events = self.events.clone();
        let timeout = self.timeout;
        self.tracker.spawn(async move {
            match with_timeout(timeout, || work).await {
                Ok(Ok(())) => debug!(label, "Extended work finished"),
                Ok(Err(e)) => events.report_error(label, &e),
                Err(e) => events.report_error(label, &e),
            }
        })
    }

    /// Track fire-and-forget work whose failures are handled inside `work`.
    pub fn track<F>(&self, work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(work)
    }

    /// Number of tracked tasks still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for all tracked work, including work spawned while waiting.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Wait for tracked work, giving up after `limit`.
    pub async fn settle_within(&self, limit: Duration) -> bool {
        let settled = tokio::time::timeout(limit, self.settle()).await.is_ok();
        if !settled {
            self.tracker.reopen();
            warn!(pending = self.pending(), ?limit, "Extended work still running");
        }
        settled
    }
}
