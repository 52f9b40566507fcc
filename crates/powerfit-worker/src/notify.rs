//! Notification Dispatch Handler and the clients it can open or focus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::Utc;
use hashbrown::HashMap;
use powerfit_net::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::NotificationConfig;
use crate::error::WorkerError;
use crate::events::{EventSender, WorkerEvent};

/// Action id that opens the site.
pub const ACTION_EXPLORE: &str = "explore";
/// Action id that only dismisses.
pub const ACTION_CLOSE: &str = "close";

// ==================== Push ====================

/// Inbound push message.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Bytes>,
}

impl PushEvent {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self {
            data: Some(Bytes::from(body.into())),
        }
    }

    /// Payload as text; invalid UTF-8 is replaced.
    pub fn body(&self) -> Option<String> {
        self.data
            .as_ref()
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }
}

// ==================== Notification Intent ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Milliseconds since the epoch.
    pub date_of_arrival: i64,
    pub primary_key: u32,
}

/// A notification to surface. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub tag: String,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl NotificationIntent {
    /// Build the intent for a push; an absent payload gets the default body.
    pub fn from_push(push: &PushEvent, config: &NotificationConfig) -> Self {
        let action = |id: &str, title: &str| NotificationAction {
            action: id.to_string(),
            title: title.to_string(),
            icon: config.action_icon.clone(),
        };
        Self {
            tag: format!("push-{}", uuid_simple()),
            title: config.title.clone(),
            body: push.body().unwrap_or_else(|| config.default_body.clone()),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: Utc::now().timestamp_millis(),
                primary_key: 1,
            },
            actions: vec![action(ACTION_EXPLORE, "Explore"), action(ACTION_CLOSE, "Close")],
        }
    }
}

/// Where notifications are displayed.
pub trait NotificationCenter: Send + Sync {
    fn show(&self, intent: &NotificationIntent) -> Result<(), WorkerError>;

    fn close(&self, tag: &str);
}

/// Notification center that keeps notifications in memory.
#[derive(Debug, Default)]
pub struct InMemoryNotifications {
    displayed: Mutex<Vec<NotificationIntent>>,
}

impl InMemoryNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications currently on screen.
    pub fn displayed(&self) -> Vec<NotificationIntent> {
        self.displayed
            .lock()
            .map(|shown| shown.clone())
            .unwrap_or_default()
    }
}

impl NotificationCenter for InMemoryNotifications {
    fn show(&self, intent: &NotificationIntent) -> Result<(), WorkerError> {
        self.displayed
            .lock()
            .map_err(|_| WorkerError::InvalidState("notification list poisoned".to_string()))?
            .push(intent.clone());
        Ok(())
    }

    fn close(&self, tag: &str) {
        if let Ok(mut shown) = self.displayed.lock() {
            shown.retain(|n| n.tag != tag);
        }
    }
}

// ==================== Clients ====================

/// A window showing the site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub focused: bool,
}

impl Client {
    pub fn focus(&mut self) {
        self.focused = true;
    }
}

/// Open windows of the site.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn match_all(&self) -> Vec<&Client> {
        self.clients.values().collect()
    }

    /// Open a focused window at `url`.
    pub fn open_window(&mut self, url: Url) -> Client {
        let id = format!("client-{}", uuid_simple());
        for other in self.clients.values_mut() {
            other.focused = false;
        }
        let client = Client {
            id: id.clone(),
            url,
            focused: true,
        };
        self.clients.insert(id, client.clone());
        client
    }

    /// Focus a client, unfocusing every other one.
    pub fn focus(&mut self, id: &str) -> Option<&Client> {
        if !self.clients.contains_key(id) {
            return None;
        }
        for (key, client) in self.clients.iter_mut() {
            client.focused = key == id;
        }
        self.clients.get(id)
    }

    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ==================== Dispatcher ====================

/// The user interacted with a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationClick {
    pub tag: String,
    /// Chosen action id; `None` for a click on the body or a dismissal.
    pub action: Option<String>,
}

/// What a click led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Closed,
    Focused { client_id: String },
    Opened { client_id: String },
}

pub struct NotificationDispatcher {
    center: Arc<dyn NotificationCenter>,
    clients: Arc<RwLock<Clients>>,
    config: NotificationConfig,
    origin: Url,
    events: EventSender,
}

impl NotificationDispatcher {
    pub fn new(
        center: Arc<dyn NotificationCenter>,
        clients: Arc<RwLock<Clients>>,
        config: NotificationConfig,
        origin: Url,
        events: EventSender,
    ) -> Self {
        Self {
            center,
            clients,
            config,
            origin,
            events,
        }
    }

    /// Always surfaces a notification.
    pub async fn on_push(&self, push: PushEvent) -> Result<NotificationIntent, WorkerError> {
        let intent = NotificationIntent::from_push(&push, &self.config);
        self.center.show(&intent)?;
        info!(tag = %intent.tag, body = %intent.body, "Notification shown");
        self.events.send(WorkerEvent::NotificationShown {
            tag: intent.tag.clone(),
            body: intent.body.clone(),
        });
        Ok(intent)
    }

    /// Close the notification; `explore` then brings the site's root window forward.
    pub async fn on_click(&self, click: NotificationClick) -> Result<ClickOutcome, WorkerError> {
        self.center.close(&click.tag);
        self.events.send(WorkerEvent::NotificationClosed {
            tag: click.tag.clone(),
            action: click.action.clone(),
        });

        if click.action.as_deref() != Some(ACTION_EXPLORE) {
            debug!(tag = %click.tag, action = ?click.action, "Notification dismissed");
            return Ok(ClickOutcome::Closed);
        }

        let target = powerfit_net::resolve(&self.origin, &self.config.open_path)?;
        let mut clients = self.clients.write().await;

        let existing = clients
            .match_all()
            .into_iter()
            .find(|c| c.url == target)
            .map(|c| c.id.clone());
        if let Some(id) = existing {
            clients.focus(&id);
            info!(client = %id, "Focused existing window");
            self.events.send(WorkerEvent::WindowFocused {
                client_id: id.clone(),
            });
            return Ok(ClickOutcome::Focused { client_id: id });
        }

        let client = clients.open_window(target);
        info!(client = %client.id, url = %client.url, "Opened window");
        self.events.send(WorkerEvent::WindowOpened {
            client_id: client.id.clone(),
            url: client.url.to_string(),
        });
        Ok(ClickOutcome::Opened {
            client_id: client.id,
        })
    }
}

// ==================== Helpers ====================

/// Generate a simple UUID-like string.
fn uuid_simple() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{:016x}-{:04x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
