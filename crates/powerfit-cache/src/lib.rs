//! # PowerFit Cache
//!
//! Named, versioned response caches (one per cache generation).
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage
//!     ├── quota (shared byte budget)
//!     └── Cache ("powerfit-gym-v1", ...)
//!             └── request key → Arc<CacheEntry>
//! ```
//!
//! Entries are immutable once stored; a put replaces the whole entry. Keys are the
//! request URL without its fragment, and only GET requests are stored or matched.
//!
//! Deleting a generation empties it and marks it evicted. Handles that outlive the
//! deletion match nothing and reject writes, so the quota only counts live caches.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::try_join_all;
use hashbrown::HashMap;
use http::{Method, StatusCode};
use powerfit_net::{Fetcher, NetError, Request, Response, ResponseSource, Url};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};

// ==================== Errors ====================

/// Errors from cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Bad response status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Cache {0} was deleted")]
    Evicted(String),
}

impl CacheError {
    /// Whether the same operation might succeed if tried again.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::Fetch { source, .. } => !matches!(source, NetError::InvalidUrl(_)),
            CacheError::BadStatus { status, .. } => matches!(status, 408 | 429 | 500..=599),
            CacheError::InvalidRequest(_)
            | CacheError::QuotaExceeded { .. }
            | CacheError::Evicted(_) => false,
        }
    }
}

// ==================== Keys ====================

/// Compute the storage key for a URL.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

fn storage_key(request: &Request) -> Option<String> {
    (request.method == Method::GET).then(|| cache_key(&request.url))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ==================== Quota ====================

/// Byte budget shared by every cache in a storage.
#[derive(Debug, Default)]
struct Quota {
    limit: Option<u64>,
    used: AtomicU64,
}

impl Quota {
    fn reserve(&self, grow: u64, shrink: u64) -> Result<(), CacheError> {
        let mut used = self.used.load(Ordering::Acquire);
        loop {
            let next = used.saturating_sub(shrink).saturating_add(grow);
            if let Some(limit) = self.limit {
                if next > limit {
                    return Err(CacheError::QuotaExceeded {
                        needed: grow,
                        available: limit.saturating_sub(used.saturating_sub(shrink)),
                    });
                }
            }
            match self
                .used
                .compare_exchange(used, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(current) => used = current,
            }
        }
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

// ==================== Cache ====================

/// A stored request/response pair.
#[derive(Debug)]
pub struct CacheEntry {
    /// Request URL the entry was stored under.
    pub url: Url,

    /// Response snapshot.
    pub response: Response,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    fn size(&self) -> u64 {
        self.response.body().len() as u64
    }

    fn to_response(&self) -> Response {
        self.response.clone().with_source(ResponseSource::Cache)
    }
}

/// One cache generation.
#[derive(Debug)]
pub struct Cache {
    name: String,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    quota: Arc<Quota>,
    /// Set under the entries write lock when the storage deletes this cache.
    evicted: AtomicBool,
}

impl Cache {
    fn new(name: &str, quota: Arc<Quota>) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            quota,
            evicted: AtomicBool::new(false),
        }
    }

    /// Whether the storage has deleted this cache.
    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    fn check_live(&self) -> Result<(), CacheError> {
        if self.is_evicted() {
            return Err(CacheError::Evicted(self.name.clone()));
        }
        Ok(())
    }

    /// Empty the cache for good, returning the bytes it held.
    async fn evict(&self) -> u64 {
        let mut entries = self.entries.write().await;
        self.evicted.store(true, Ordering::Release);
        entries.drain().map(|(_, e)| e.size()).sum()
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        let key = storage_key(request)?;
        self.entries
            .read()
            .await
            .get(&key)
            .map(|entry| entry.to_response())
    }

    /// Match a plain URL as a GET request.
    pub async fn match_url(&self, url: &Url) -> Option<Response> {
        self.entries
            .read()
            .await
            .get(&cache_key(url))
            .map(|entry| entry.to_response())
    }

    /// Store a response, replacing any previous entry for the request.
    pub async fn put(&self, request: &Request, response: Response) -> Result<(), CacheError> {
        let key = storage_key(request).ok_or_else(|| {
            CacheError::InvalidRequest(format!("cannot store {} requests", request.method))
        })?;
        if response.status == StatusCode::PARTIAL_CONTENT {
            return Err(CacheError::InvalidRequest(
                "partial responses cannot be stored".to_string(),
            ));
        }

        let entry = Arc::new(CacheEntry {
            url: request.url.clone(),
            response,
            cached_at: now_millis(),
        });

        let mut entries = self.entries.write().await;
        self.check_live()?;
        let replaced = entries.get(&key).map(|e| e.size()).unwrap_or(0);
        self.quota.reserve(entry.size(), replaced)?;
        trace!(cache = %self.name, key = %key, bytes = entry.size(), "Stored entry");
        entries.insert(key, entry);
        Ok(())
    }

    /// Fetch and store one request.
    pub async fn add(&self, fetcher: &dyn Fetcher, request: Request) -> Result<(), CacheError> {
        self.add_all(fetcher, vec![request]).await
    }

    /// Fetch every request and store them all, or nothing.
    ///
    /// Any transport failure or non-ok status rejects the whole batch before a single
    /// entry is written.
    pub async fn add_all(
        &self,
        fetcher: &dyn Fetcher,
        requests: Vec<Request>,
    ) -> Result<(), CacheError> {
        for request in &requests {
            if request.method != Method::GET {
                return Err(CacheError::InvalidRequest(format!(
                    "cannot add {} request for {}",
                    request.method, request.url
                )));
            }
        }

        let fetched = try_join_all(requests.into_iter().map(|request| async move {
            let response = fetcher
                .fetch(&request)
                .await
                .map_err(|source| CacheError::Fetch {
                    url: request.url.to_string(),
                    source,
                })?;
            if !response.ok() {
                return Err(CacheError::BadStatus {
                    url: request.url.to_string(),
                    status: response.status.as_u16(),
                });
            }
            Ok((request, response))
        }))
        .await?;

        let cached_at = now_millis();
        let batch: Vec<(String, Arc<CacheEntry>)> = fetched
            .into_iter()
            .map(|(request, response)| {
                (
                    cache_key(&request.url),
                    Arc::new(CacheEntry {
                        url: request.url,
                        response,
                        cached_at,
                    }),
                )
            })
            .collect();

        let mut entries = self.entries.write().await;
        self.check_live()?;
        let grow: u64 = batch.iter().map(|(_, e)| e.size()).sum();
        let shrink: u64 = batch
            .iter()
            .filter_map(|(key, _)| entries.get(key).map(|e| e.size()))
            .sum();
        self.quota.reserve(grow, shrink)?;

        debug!(cache = %self.name, count = batch.len(), bytes = grow, "Added entries");
        entries.extend(batch);
        Ok(())
    }

    /// Delete an entry.
    pub async fn delete(&self, request: &Request) -> bool {
        let Some(key) = storage_key(request) else {
            return false;
        };
        match self.entries.write().await.remove(&key) {
            Some(entry) => {
                self.quota.release(entry.size());
                true
            }
            None => false,
        }
    }

    /// All stored URLs, sorted.
    pub async fn keys(&self) -> Vec<Url> {
        let mut keys: Vec<Url> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.url.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ==================== Cache Storage ====================

/// All caches for one origin.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: RwLock<Vec<Arc<Cache>>>,
    quota: Arc<Quota>,
}

impl CacheStorage {
    /// Create new cache storage without a byte limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create cache storage limited to `bytes` of response bodies.
    pub fn with_quota(bytes: u64) -> Self {
        Self {
            caches: RwLock::new(Vec::new()),
            quota: Arc::new(Quota {
                limit: Some(bytes),
                used: AtomicU64::new(0),
            }),
        }
    }

    /// Open a cache (creates if doesn't exist).
    pub async fn open(&self, name: &str) -> Arc<Cache> {
        if let Some(cache) = self.find(name).await {
            return cache;
        }

        let mut caches = self.caches.write().await;
        // Re-check under the write lock.
        if let Some(cache) = caches.iter().find(|c| c.name == name) {
            return Arc::clone(cache);
        }
        debug!(cache = %name, "Created cache");
        let cache = Arc::new(Cache::new(name, Arc::clone(&self.quota)));
        caches.push(Arc::clone(&cache));
        cache
    }

    /// Look up an existing cache without creating it.
    pub async fn find(&self, name: &str) -> Option<Arc<Cache>> {
        self.caches
            .read()
            .await
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.find(name).await.is_some()
    }

    /// Delete a cache.
    pub async fn delete(&self, name: &str) -> bool {
        let removed = {
            let mut caches = self.caches.write().await;
            let Some(pos) = caches.iter().position(|c| c.name == name) else {
                return false;
            };
            caches.remove(pos)
        };
        let bytes = removed.evict().await;
        self.quota.release(bytes);
        debug!(cache = %name, bytes, "Deleted cache");
        true
    }

    /// Get all cache names, in creation order.
    pub async fn keys(&self) -> Vec<String> {
        self.caches
            .read()
            .await
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Match across all caches, oldest first.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        let caches: Vec<Arc<Cache>> = self.caches.read().await.clone();
        for cache in caches {
            if let Some(response) = cache.match_request(request).await {
                return Some(response);
            }
        }
        None
    }

    /// Bytes currently counted against the quota.
    pub fn used_bytes(&self) -> u64 {
        self.quota.used.load(Ordering::Acquire)
    }
}
