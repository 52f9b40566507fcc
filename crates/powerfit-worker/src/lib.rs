//! # PowerFit Worker
//!
//! Offline caching worker for the PowerFit Gym site.
//!
//! ## Features
//!
//! - **Lifecycle**: install the shell into a cache generation, activate it and evict
//!   every stale generation
//! - **Fetch interception**: offline-first by default, with cache-first, network-first
//!   and stale-while-revalidate selectable per route
//! - **Background sync**: replay queued contact-form submissions, refresh the shell
//! - **Notifications**: push handling and notification clicks
//!
//! ## Architecture
//!
//! ```text
//! WorkerHost (event loop)
//!     │
//!     └── ShellWorker
//!             ├── LifecycleManager ── Registration (installing / waiting / active)
//!             │                    └── CacheStorage ("powerfit-gym-v1", ...)
//!             ├── RequestInterceptor ── RouteTable → Strategy
//!             ├── BackgroundSync ── Outbox
//!             ├── NotificationDispatcher ── Clients
//!             └── ExtendedLifetime (tracked background work)
//! ```

use std::sync::Arc;

use powerfit_cache::CacheStorage;
use powerfit_net::{Fetcher, Request, Response};
use powerfit_outbox::{Outbox, PendingSubmission};
use tokio::sync::{mpsc, RwLock};
use tracing::info;

pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod intercept;
pub mod lifecycle;
pub mod lifetime;
pub mod message;
pub mod notify;
pub mod routes;
pub mod strategy;
pub mod sync;

pub use config::{InstallRetryConfig, NotificationConfig, SyncConfig, WorkerConfig};
pub use error::{FetchError, WorkerError};
pub use events::{EventSender, WorkerEvent};
pub use host::{EventOutcome, HostError, HostEvent, HostHandle, WorkerHost};
pub use intercept::RequestInterceptor;
pub use lifecycle::{
    ActiveGeneration, InstallOutcome, LifecycleManager, Registration, VersionId, VersionState,
    WorkerVersion,
};
pub use lifetime::ExtendedLifetime;
pub use message::WorkerMessage;
pub use notify::{
    ClickOutcome, Client, Clients, InMemoryNotifications, NotificationAction,
    NotificationCenter, NotificationClick, NotificationData, NotificationDispatcher,
    NotificationIntent, PushEvent, ACTION_CLOSE, ACTION_EXPLORE,
};
pub use routes::{PatternType, Route, RouteTable, UrlPattern};
pub use strategy::{is_cacheable, Strategy};
pub use sync::{BackgroundSync, PeriodicSyncEvent, SyncEvent, SyncOutcome};

// ==================== Shell Worker ====================

/// The worker: one handler per event type.
pub struct ShellWorker {
    config: WorkerConfig,
    lifecycle: Arc<LifecycleManager>,
    interceptor: RequestInterceptor,
    sync: BackgroundSync,
    notifications: NotificationDispatcher,
    clients: Arc<RwLock<Clients>>,
    lifetime: ExtendedLifetime,
    events: EventSender,
}

impl ShellWorker {
    pub fn builder(config: WorkerConfig) -> ShellWorkerBuilder {
        ShellWorkerBuilder::new(config)
    }

    pub(crate) fn report(&self, context: &str, err: &dyn std::error::Error) {
        self.events.report_error(context, err);
    }

    fn reported<T>(&self, context: &str, result: Result<T, WorkerError>) -> Result<T, WorkerError> {
        if let Err(e) = &result {
            self.events.report_error(context, e);
        }
        result
    }

    /// Install the configured generation with the configured shell manifest.
    pub async fn install(&self) -> Result<InstallOutcome, WorkerError> {
        let result = match self.config.manifest_urls() {
            Ok(manifest) => self.lifecycle.install(&self.config.cache_name, manifest).await,
            Err(e) => Err(e.into()),
        };
        self.reported("install", result)
    }

    /// Install a new deployment with its own generation and manifest.
    pub async fn install_version(
        &self,
        generation: &str,
        manifest: &[String],
    ) -> Result<InstallOutcome, WorkerError> {
        let urls = manifest
            .iter()
            .map(|path| self.config.resolve(path))
            .collect::<Result<Vec<_>, _>>();
        let result = match urls {
            Ok(urls) => self.lifecycle.install(generation, urls).await,
            Err(e) => Err(e.into()),
        };
        self.reported("install", result)
    }

    /// Clients of the old version are gone; promote the waiting version.
    pub async fn activate(&self) -> Result<Option<String>, WorkerError> {
        let result = self.lifecycle.clients_released().await;
        self.reported("activate", result)
    }

    /// Handle a message posted by the page. Returns the newly active generation when
    /// the message caused an activation.
    pub async fn message(&self, data: &serde_json::Value) -> Result<Option<String>, WorkerError> {
        match WorkerMessage::parse(data) {
            Some(WorkerMessage::SkipWaiting) => {
                let result = self.lifecycle.skip_waiting().await;
                self.reported("message", result)
            }
            None => Ok(None),
        }
    }

    /// Answer an intercepted request using its route's strategy.
    pub async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        self.interceptor.handle(request).await
    }

    pub async fn fetch_with(
        &self,
        request: Request,
        strategy: Strategy,
    ) -> Result<Response, FetchError> {
        self.interceptor.handle_with(request, strategy).await
    }

    pub async fn push(&self, push: PushEvent) -> Result<NotificationIntent, WorkerError> {
        let result = self.notifications.on_push(push).await;
        self.reported("push", result)
    }

    pub async fn notification_click(
        &self,
        click: NotificationClick,
    ) -> Result<ClickOutcome, WorkerError> {
        let result = self.notifications.on_click(click).await;
        self.reported("notificationclick", result)
    }

    pub async fn sync(&self, event: SyncEvent) -> Result<SyncOutcome, WorkerError> {
        let result = self.sync.on_sync(event).await;
        self.reported("sync", result)
    }

    pub async fn periodic_sync(
        &self,
        event: PeriodicSyncEvent,
    ) -> Result<SyncOutcome, WorkerError> {
        let result = self.sync.on_periodic_sync(event).await;
        self.reported("periodicsync", result)
    }

    /// Queue a contact-form submission for the next sync.
    pub async fn queue_submission(&self, record: PendingSubmission) -> Result<i64, WorkerError> {
        let result = self.sync.queue(record).await;
        self.reported("queue", result)
    }

    /// Wait until all background work started by handlers has finished.
    pub async fn settle(&self) {
        self.lifetime.settle().await;
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn caches(&self) -> &Arc<CacheStorage> {
        self.lifecycle.caches()
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        self.sync.outbox()
    }

    pub fn clients(&self) -> &Arc<RwLock<Clients>> {
        &self.clients
    }

    pub fn lifetime(&self) -> &ExtendedLifetime {
        &self.lifetime
    }

    pub async fn active_generation(&self) -> Option<String> {
        self.lifecycle.active_generation().await
    }
}

// ==================== Builder ====================

pub struct ShellWorkerBuilder {
    config: WorkerConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    caches: Option<Arc<CacheStorage>>,
    outbox: Option<Arc<Outbox>>,
    notifications: Option<Arc<dyn NotificationCenter>>,
}

impl ShellWorkerBuilder {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            fetcher: None,
            caches: None,
            outbox: None,
            notifications: None,
        }
    }

    /// Network access. Required.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Share an existing cache storage instead of creating one.
    pub fn caches(mut self, caches: Arc<CacheStorage>) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Use this outbox instead of opening `storage_path`.
    pub fn outbox(mut self, outbox: Arc<Outbox>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn notifications(mut self, center: Arc<dyn NotificationCenter>) -> Self {
        self.notifications = Some(center);
        self
    }

    pub fn build(self) -> Result<(ShellWorker, mpsc::UnboundedReceiver<WorkerEvent>), WorkerError> {
        let config = self.config;
        config.validate()?;

        let fetcher = self
            .fetcher
            .ok_or_else(|| WorkerError::InvalidState("no fetcher configured".to_string()))?;
        let caches = match self.caches {
            Some(caches) => caches,
            None => Arc::new(match config.cache_quota_bytes {
                Some(bytes) => CacheStorage::with_quota(bytes),
                None => CacheStorage::new(),
            }),
        };
        let outbox = match self.outbox {
            Some(outbox) => outbox,
            None => Arc::new(Outbox::open(&config.storage_path)?),
        };
        let center = self
            .notifications
            .unwrap_or_else(|| Arc::new(InMemoryNotifications::new()));

        let (events, rx) = EventSender::channel();
        let lifetime = ExtendedLifetime::new(events.clone(), config.event_timeout());
        let lifecycle = Arc::new(LifecycleManager::new(
            config.origin.clone(),
            caches,
            Arc::clone(&fetcher),
            config.retry_config(),
            events.clone(),
        ));
        let interceptor = RequestInterceptor::new(
            Arc::clone(&lifecycle),
            fetcher,
            RouteTable::from_routes(config.routes.iter().cloned()),
            config.fallback_url()?,
            lifetime.clone(),
        );
        let sync = BackgroundSync::new(
            outbox,
            Arc::clone(&lifecycle),
            config.sync.clone(),
            events.clone(),
        );
        let clients = Arc::new(RwLock::new(Clients::new()));
        let notifications = NotificationDispatcher::new(
            center,
            Arc::clone(&clients),
            config.notifications.clone(),
            config.origin.clone(),
            events.clone(),
        );

        info!(origin = %config.origin, generation = %config.cache_name, "Worker ready");

        Ok((
            ShellWorker {
                config,
                lifecycle,
                interceptor,
                sync,
                notifications,
                clients,
                lifetime,
                events,
            },
            rx,
        ))
    }
}
