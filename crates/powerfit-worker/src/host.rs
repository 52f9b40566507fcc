//! Event host: feeds events to a [`ShellWorker`] one at a time.
//!
//! Lifecycle events (install, activate, messages) run to completion before the next
//! event is taken, so every fetch queued after an activation sees the new generation.
//! Fetches, pushes, clicks and syncs run concurrently on the worker's extended
//! lifetime, each bounded by the configured event timeout.

use std::sync::Arc;

use powerfit_common::{with_timeout, ShellError};
use powerfit_net::{Request, Response};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FetchError, WorkerError};
use crate::lifecycle::InstallOutcome;
use crate::notify::{ClickOutcome, NotificationClick, NotificationIntent, PushEvent};
use crate::sync::{PeriodicSyncEvent, SyncEvent, SyncOutcome};
use crate::ShellWorker;

/// An event delivered by the host environment.
#[derive(Debug, Clone)]
pub enum HostEvent {
    Install,
    Activate,
    Message(serde_json::Value),
    Fetch(Request),
    Push(PushEvent),
    NotificationClick(NotificationClick),
    Sync(SyncEvent),
    PeriodicSync(PeriodicSyncEvent),
}

impl HostEvent {
    fn name(&self) -> &'static str {
        match self {
            HostEvent::Install => "install",
            HostEvent::Activate => "activate",
            HostEvent::Message(_) => "message",
            HostEvent::Fetch(_) => "fetch",
            HostEvent::Push(_) => "push",
            HostEvent::NotificationClick(_) => "notificationclick",
            HostEvent::Sync(_) => "sync",
            HostEvent::PeriodicSync(_) => "periodicsync",
        }
    }
}

/// Result of a handled event.
#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallOutcome),
    /// Generation that became active, if any.
    Activated(Option<String>),
    Response(Response),
    NotificationShown(NotificationIntent),
    NotificationClicked(ClickOutcome),
    Synced(SyncOutcome),
}

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Worker host has stopped")]
    Stopped,

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Timeout(ShellError),
}

type Reply = oneshot::Sender<Result<EventOutcome, HostError>>;

/// Handle for dispatching events to a running host.
#[derive(Debug, Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<(HostEvent, Reply)>,
    shutdown: CancellationToken,
}

impl HostHandle {
    /// Dispatch an event and wait for its outcome.
    pub async fn dispatch(&self, event: HostEvent) -> Result<EventOutcome, HostError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send((event, reply))
            .map_err(|_| HostError::Stopped)?;
        rx.await.map_err(|_| HostError::Stopped)?
    }

    pub async fn fetch(&self, request: Request) -> Result<Response, HostError> {
        match self.dispatch(HostEvent::Fetch(request)).await? {
            EventOutcome::Response(response) => Ok(response),
            other => {
                Err(WorkerError::InvalidState(format!("unexpected outcome {:?}", other)).into())
            }
        }
    }

    /// Stop taking events. Work already started is allowed to finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Event loop around a worker.
pub struct WorkerHost {
    worker: Arc<ShellWorker>,
    rx: mpsc::UnboundedReceiver<(HostEvent, Reply)>,
    shutdown: CancellationToken,
}

impl WorkerHost {
    /// Start the event loop on the current runtime.
    pub fn spawn(worker: Arc<ShellWorker>) -> (HostHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let host = WorkerHost {
            worker,
            rx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(host.run());
        (HostHandle { tx, shutdown }, task)
    }

    async fn run(mut self) {
        info!("Worker host started");
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                next = self.rx.recv() => next,
            };
            let Some((event, reply)) = next else { break };
            debug!(event = event.name(), "Dispatching event");

            match event {
                HostEvent::Install => {
                    let result = self.worker.install().await;
                    let _ = reply.send(result.map(EventOutcome::Installed).map_err(Into::into));
                }
                HostEvent::Activate => {
                    let result = self.worker.activate().await;
                    let _ = reply.send(result.map(EventOutcome::Activated).map_err(Into::into));
                }
                HostEvent::Message(data) => {
                    let result = self.worker.message(&data).await;
                    let _ = reply.send(result.map(EventOutcome::Activated).map_err(Into::into));
                }
                event => self.spawn_bounded(event, reply),
            }
        }

        let limit = self.worker.config().event_timeout();
        if !self.worker.lifetime().settle_within(limit).await {
            warn!("Worker host stopped with background work still running");
            return;
        }
        info!("Worker host stopped");
    }

    /// Run a non-lifecycle event on the extended lifetime, bounded by the event timeout.
    fn spawn_bounded(&self, event: HostEvent, reply: Reply) {
        let worker = Arc::clone(&self.worker);
        let timeout = worker.config().event_timeout();
        self.worker.lifetime().track(async move {
            let name = event.name();
            let result = with_timeout(timeout, || handle(&worker, event))
                .await
                .unwrap_or_else(|e| Err(HostError::Timeout(e)));
            if let Err(HostError::Timeout(e)) = &result {
                worker.report(name, e);
            }
            let _ = reply.send(result);
        });
    }
}

async fn handle(worker: &ShellWorker, event: HostEvent) -> Result<EventOutcome, HostError> {
    Ok(match event {
        HostEvent::Fetch(request) => EventOutcome::Response(worker.fetch(request).await?),
        HostEvent::Push(push) => EventOutcome::NotificationShown(worker.push(push).await?),
        HostEvent::NotificationClick(click) => {
            EventOutcome::NotificationClicked(worker.notification_click(click).await?)
        }
        HostEvent::Sync(sync) => EventOutcome::Synced(worker.sync(sync).await?),
        HostEvent::PeriodicSync(sync) => EventOutcome::Synced(worker.periodic_sync(sync).await?),
        HostEvent::Install | HostEvent::Activate | HostEvent::Message(_) => {
            return Err(WorkerError::InvalidState(
                "lifecycle events are handled in order".to_string(),
            )
            .into())
        }
    })
}
