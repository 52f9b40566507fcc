//! Background Replay Trigger.
//!
//! Both triggers are best effort: the host decides when (and whether) they fire.

use std::sync::Arc;

use powerfit_outbox::{Outbox, PendingSubmission};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::WorkerError;
use crate::events::{EventSender, WorkerEvent};
use crate::lifecycle::LifecycleManager;

/// One-shot "connectivity restored" signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub tag: String,
}

impl SyncEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

/// Recurring refresh signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicSyncEvent {
    pub tag: String,
}

impl PeriodicSyncEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

/// What a sync event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Drained and replayed this many pending submissions.
    Replayed(usize),
    /// Re-fetched the shell into this generation.
    Refreshed(String),
    /// Tag not handled by the worker.
    Ignored,
}

pub struct BackgroundSync {
    outbox: Arc<Outbox>,
    lifecycle: Arc<LifecycleManager>,
    config: SyncConfig,
    events: EventSender,
}

impl BackgroundSync {
    pub fn new(
        outbox: Arc<Outbox>,
        lifecycle: Arc<LifecycleManager>,
        config: SyncConfig,
        events: EventSender,
    ) -> Self {
        Self {
            outbox,
            lifecycle,
            config,
            events,
        }
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Queue a submission that could not be delivered.
    pub async fn queue(&self, record: PendingSubmission) -> Result<i64, WorkerError> {
        let outbox = Arc::clone(&self.outbox);
        let id = tokio::task::spawn_blocking(move || outbox.append(&record))
            .await
            .map_err(|e| WorkerError::TaskFailed(e.to_string()))??;
        Ok(id)
    }

    pub async fn on_sync(&self, event: SyncEvent) -> Result<SyncOutcome, WorkerError> {
        if event.tag != self.config.contact_form_tag {
            debug!(tag = %event.tag, "Ignoring sync tag");
            return Ok(SyncOutcome::Ignored);
        }

        let outbox = Arc::clone(&self.outbox);
        let records = tokio::task::spawn_blocking(move || outbox.drain_all())
            .await
            .map_err(|e| WorkerError::TaskFailed(e.to_string()))??;

        // Records are already gone from the store; delivery is at most once.
        for record in &records {
            info!(
                submitted_at = %record.submitted_at,
                fields = ?record.fields,
                "Replaying contact form submission"
            );
        }

        let replayed = records.len();
        info!(tag = %event.tag, replayed, "Sync complete");
        self.events.send(WorkerEvent::SyncCompleted {
            tag: event.tag,
            replayed,
        });
        Ok(SyncOutcome::Replayed(replayed))
    }

    pub async fn on_periodic_sync(
        &self,
        event: PeriodicSyncEvent,
    ) -> Result<SyncOutcome, WorkerError> {
        if event.tag != self.config.periodic_tag {
            debug!(tag = %event.tag, "Ignoring periodic sync tag");
            return Ok(SyncOutcome::Ignored);
        }
        let generation = self.lifecycle.refresh_shell().await?;
        Ok(SyncOutcome::Refreshed(generation))
    }
}
