//! Cache Lifecycle Manager.
//!
//! Owns the registration (installing, waiting and active worker versions) and the single
//! current cache generation.
//!
//! ## State machine
//!
//! ```text
//! Parsed → Installing → Installed ──(activate)──→ Activating → Activated
//!              │                                                  │
//!              └──(install failed)──→ Redundant ←──(superseded)───┘
//! ```
//!
//! Activation holds the registration write lock while stale generations are deleted.
//! Fetches hold a read guard only for the cache read itself, never across network I/O,
//! so no request is served from a generation that is being evicted and a slow request
//! never blocks install or activation. Writes that land after eviction are rejected
//! by the deleted cache.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use powerfit_cache::{Cache, CacheError, CacheStorage};
use powerfit_common::{retry_if, RetryConfig};
use powerfit_net::{Fetcher, Request, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::events::{EventSender, WorkerEvent};

// ==================== Types ====================

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionId(u64);

impl VersionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Worker version state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VersionState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Shell assets are being fetched.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Evicting stale generations.
    Activating,
    /// Serving requests.
    Activated,
    /// Replaced or install failed.
    Redundant,
}

/// One deployed version of the worker and the generation it serves.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    pub id: VersionId,
    pub generation: String,
    pub manifest: Vec<Url>,
    pub state: VersionState,
    pub state_changed_at: Instant,
}

impl WorkerVersion {
    pub fn new(generation: impl Into<String>, manifest: Vec<Url>) -> Self {
        Self {
            id: VersionId::new(),
            generation: generation.into(),
            manifest,
            state: VersionState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    fn set_state(&mut self, state: VersionState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == VersionState::Activated
    }
}

// ==================== Registration ====================

/// Installing, waiting and active versions for one scope.
#[derive(Debug)]
pub struct Registration {
    pub scope: Url,
    pub installing: Option<WorkerVersion>,
    pub waiting: Option<WorkerVersion>,
    pub active: Option<WorkerVersion>,
}

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Generation currently serving requests.
    pub fn active_generation(&self) -> Option<&str> {
        self.active.as_ref().map(|v| v.generation.as_str())
    }
}

/// What an install led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// No version was active, so the new one took over immediately.
    Activated { version: VersionId },
    /// Installed; waits for clients to be released or for skip-waiting.
    Waiting { version: VersionId },
}

/// Read access to the active generation.
///
/// Activation cannot start while this guard is alive, so keep it short-lived.
pub struct ActiveGeneration {
    registration: OwnedRwLockReadGuard<Registration>,
    cache: Arc<Cache>,
}

impl ActiveGeneration {
    pub fn name(&self) -> &str {
        self.cache.name()
    }

    /// Shell assets of the active version.
    pub fn manifest(&self) -> &[Url] {
        self.registration
            .active
            .as_ref()
            .map(|v| v.manifest.as_slice())
            .unwrap_or_default()
    }

    /// Shared handle for work that outlives this guard.
    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.cache)
    }
}

impl std::ops::Deref for ActiveGeneration {
    type Target = Cache;

    fn deref(&self) -> &Cache {
        &self.cache
    }
}

// ==================== Lifecycle Manager ====================

pub struct LifecycleManager {
    caches: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    registration: Arc<RwLock<Registration>>,
    install_lock: Mutex<()>,
    retry: RetryConfig,
    events: EventSender,
}

impl LifecycleManager {
    pub fn new(
        scope: Url,
        caches: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        retry: RetryConfig,
        events: EventSender,
    ) -> Self {
        Self {
            caches,
            fetcher,
            registration: Arc::new(RwLock::new(Registration::new(scope))),
            install_lock: Mutex::new(()),
            retry,
            events,
        }
    }

    pub fn caches(&self) -> &Arc<CacheStorage> {
        &self.caches
    }

    fn announce(&self, version: &WorkerVersion) {
        debug!(version = %version.id, generation = %version.generation, state = ?version.state, "Version state changed");
        self.events.send(WorkerEvent::StateChange {
            version: version.id,
            generation: version.generation.clone(),
            new_state: version.state,
        });
    }

    /// Install a version: populate `generation` with every asset in `manifest`.
    ///
    /// Transient batch failures are retried per the install retry policy. If it still fails, the
    /// version becomes redundant, a generation created by this install is deleted,
    /// and whatever was active stays active.
    pub async fn install(
        &self,
        generation: &str,
        manifest: Vec<Url>,
    ) -> Result<InstallOutcome, WorkerError> {
        let _installing = self.install_lock.lock().await;

        let mut version = WorkerVersion::new(generation, manifest);
        version.set_state(VersionState::Installing);
        self.announce(&version);
        self.registration.write().await.installing = Some(version.clone());

        info!(version = %version.id, generation, assets = version.manifest.len(), "Installing");

        let existed = self.caches.has(generation).await;
        let cache = self.caches.open(generation).await;
        let requests: Vec<Request> = version.manifest.iter().cloned().map(Request::get).collect();
        let fetcher = self.fetcher.as_ref();

        let populated = retry_if(&self.retry, CacheError::is_transient, || {
            let cache = &cache;
            let requests = requests.clone();
            async move { cache.add_all(fetcher, requests).await }
        })
        .await;

        if let Err(source) = populated {
            if !existed {
                self.caches.delete(generation).await;
            }
            self.registration.write().await.installing = None;
            version.set_state(VersionState::Redundant);
            self.announce(&version);
            warn!(version = %version.id, generation, error = %source, "Install failed");
            return Err(WorkerError::Install {
                generation: generation.to_string(),
                source,
            });
        }

        version.set_state(VersionState::Installed);
        let first_install = {
            let mut registration = self.registration.write().await;
            registration.installing = None;
            if let Some(mut replaced) = registration.waiting.replace(version.clone()) {
                replaced.set_state(VersionState::Redundant);
                self.announce(&replaced);
            }
            registration.active.is_none()
        };
        self.announce(&version);
        info!(version = %version.id, generation, "Installed");

        if first_install {
            self.activate().await?;
            Ok(InstallOutcome::Activated { version: version.id })
        } else {
            Ok(InstallOutcome::Waiting { version: version.id })
        }
    }

    /// Promote the waiting version and evict every other generation.
    ///
    /// Returns the generation now serving, or `None` when nothing was waiting.
    pub async fn activate(&self) -> Result<Option<String>, WorkerError> {
        let mut registration = self.registration.write().await;
        let Some(mut next) = registration.waiting.take() else {
            debug!("Nothing waiting to activate");
            return Ok(None);
        };

        next.set_state(VersionState::Activating);
        self.announce(&next);

        for name in self.caches.keys().await {
            if name != next.generation && self.caches.delete(&name).await {
                info!(generation = %name, "Deleted stale cache generation");
                self.events.send(WorkerEvent::CacheEvicted { generation: name });
            }
        }

        if let Some(mut previous) = registration.active.take() {
            previous.set_state(VersionState::Redundant);
            self.announce(&previous);
        }

        next.set_state(VersionState::Activated);
        self.announce(&next);
        let generation = next.generation.clone();
        registration.active = Some(next);

        info!(generation = %generation, "Activated");
        Ok(Some(generation))
    }

    /// Page asked the waiting version to take over now.
    pub async fn skip_waiting(&self) -> Result<Option<String>, WorkerError> {
        info!("Skip waiting requested");
        self.activate().await
    }

    /// Every page controlled by the old version has closed.
    pub async fn clients_released(&self) -> Result<Option<String>, WorkerError> {
        debug!("Clients released");
        self.activate().await
    }

    /// Read access to the active generation, or `None` before the first activation.
    pub async fn serving(&self) -> Option<ActiveGeneration> {
        let registration = Arc::clone(&self.registration).read_owned().await;
        let name = registration.active_generation()?.to_string();
        let Some(cache) = self.caches.find(&name).await else {
            warn!(generation = %name, "Active generation has no cache");
            return None;
        };
        Some(ActiveGeneration {
            registration,
            cache,
        })
    }

    /// Re-fetch the active version's manifest into its generation without reinstalling.
    pub async fn refresh_shell(&self) -> Result<String, WorkerError> {
        let (cache, requests) = {
            let active = self.serving().await.ok_or_else(|| {
                WorkerError::InvalidState("no active generation to refresh".to_string())
            })?;
            let requests: Vec<Request> = active.manifest().iter().cloned().map(Request::get).collect();
            (active.cache(), requests)
        };

        cache.add_all(self.fetcher.as_ref(), requests).await?;

        let generation = cache.name().to_string();
        info!(generation = %generation, "Refreshed shell assets");
        self.events.send(WorkerEvent::ShellRefreshed {
            generation: generation.clone(),
        });
        Ok(generation)
    }

    pub async fn active_generation(&self) -> Option<String> {
        self.registration
            .read()
            .await
            .active_generation()
            .map(str::to_string)
    }

    pub async fn active_version(&self) -> Option<WorkerVersion> {
        self.registration.read().await.active.clone()
    }

    pub async fn waiting_version(&self) -> Option<WorkerVersion> {
        self.registration.read().await.waiting.clone()
    }
}
