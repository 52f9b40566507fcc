//! Events reported to the host.

use tokio::sync::mpsc;
use tracing::{error, trace};

use crate::lifecycle::{VersionId, VersionState};

/// Worker events, delivered on the host's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A worker version changed state.
    StateChange {
        version: VersionId,
        generation: String,
        new_state: VersionState,
    },
    /// A stale cache generation was deleted.
    CacheEvicted { generation: String },
    /// The shell assets were re-fetched into the current generation.
    ShellRefreshed { generation: String },
    NotificationShown { tag: String, body: String },
    NotificationClosed { tag: String, action: Option<String> },
    WindowOpened { client_id: String, url: String },
    WindowFocused { client_id: String },
    /// Background sync drained the pending-submission queue.
    SyncCompleted { tag: String, replayed: usize },
    /// An error from a handler or from background work.
    Error { context: String, message: String },
}

/// Cloneable sender half of the host channel.
///
/// Sending never fails loudly: a host that stopped listening just misses events.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, event: WorkerEvent) {
        trace!(?event, "Worker event");
        let _ = self.tx.send(event);
    }

    /// Log an error and forward it to the host's error channel.
    pub fn report_error(&self, context: &str, err: &dyn std::error::Error) {
        error!(context, error = %err, "Worker error");
        self.send(WorkerEvent::Error {
            context: context.to_string(),
            message: err.to_string(),
        });
    }
}
