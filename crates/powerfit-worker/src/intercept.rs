//! Request Interceptor.
//!
//! Answers intercepted fetches from the active generation or the network, depending on
//! the strategy chosen for the route. Cache population is fire-and-forget: it runs on
//! the worker's extended lifetime, and a failed write is reported to the host without
//! failing the response.

use std::sync::Arc;

use http::Method;
use powerfit_cache::{Cache, CacheError};
use powerfit_net::{Fetcher, NetError, Request, Response, Url};
use tracing::{debug, info, trace};

use crate::error::FetchError;
use crate::lifecycle::LifecycleManager;
use crate::lifetime::ExtendedLifetime;
use crate::routes::RouteTable;
use crate::strategy::{is_cacheable, Strategy};

pub struct RequestInterceptor {
    lifecycle: Arc<LifecycleManager>,
    fetcher: Arc<dyn Fetcher>,
    routes: RouteTable,
    /// Cached document substituted for failed navigations.
    fallback: Url,
    lifetime: ExtendedLifetime,
}

impl RequestInterceptor {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        fetcher: Arc<dyn Fetcher>,
        routes: RouteTable,
        fallback: Url,
        lifetime: ExtendedLifetime,
    ) -> Self {
        Self {
            lifecycle,
            fetcher,
            routes,
            fallback,
            lifetime,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Handle a request with the strategy its route selects.
    pub async fn handle(&self, request: Request) -> Result<Response, FetchError> {
        let strategy = self.routes.strategy_for(&request);
        self.handle_with(request, strategy).await
    }

    /// Handle a request with an explicit strategy.
    ///
    /// The active generation is only locked while it is read. Network I/O runs
    /// unlocked, so a slow request never holds up install or activation.
    pub async fn handle_with(
        &self,
        request: Request,
        strategy: Strategy,
    ) -> Result<Response, FetchError> {
        trace!(url = %request.url, %strategy, "Intercepting request");

        let Some(cache) = self.lifecycle.serving().await.map(|active| active.cache()) else {
            debug!(url = %request.url, "No active generation, passing through");
            return self.network(&request).await.map_err(|e| network_failure(&request, e));
        };

        match strategy {
            Strategy::OfflineFirst => self.offline_first(cache, request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(cache, request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(cache, request).await,
        }
    }

    async fn network(&self, request: &Request) -> Result<Response, NetError> {
        self.fetcher.fetch(request).await
    }

    /// Look `request` up in whatever generation is active right now.
    async fn cached(&self, request: &Request) -> Option<Response> {
        let active = self.lifecycle.serving().await?;
        active.match_request(request).await
    }

    async fn cached_fallback(&self) -> Option<Response> {
        let active = self.lifecycle.serving().await?;
        active.match_url(&self.fallback).await
    }

    /// Cache a copy of `response` in the background if it qualifies.
    fn populate(&self, cache: Arc<Cache>, request: &Request, response: &Response) {
        store(&self.lifetime, cache, request, response);
    }

    /// Cache hit, else network (populating the cache), else the shell page for
    /// navigations.
    async fn offline_first(
        &self,
        cache: Arc<Cache>,
        request: Request,
    ) -> Result<Response, FetchError> {
        if let Some(hit) = self.cached(&request).await {
            debug!(url = %request.url, "Cache hit");
            return Ok(hit);
        }

        match self.network(&request).await {
            Ok(response) => {
                self.populate(cache, &request, &response);
                Ok(response)
            }
            Err(e) if request.is_navigation() => match self.cached_fallback().await {
                Some(page) => {
                    info!(url = %request.url, error = %e, "Offline, serving shell page");
                    Ok(page)
                }
                None => Err(FetchError::NoCachedResponse {
                    url: request.url.to_string(),
                    source: e,
                }),
            },
            Err(e) => Err(network_failure(&request, e)),
        }
    }

    /// Cache hit, else network. Nothing is written back.
    async fn cache_first(&self, request: Request) -> Result<Response, FetchError> {
        if let Some(hit) = self.cached(&request).await {
            debug!(url = %request.url, "Cache hit");
            return Ok(hit);
        }

        self.network(&request)
            .await
            .map_err(|e| network_failure(&request, e))
    }

    async fn network_first(
        &self,
        cache: Arc<Cache>,
        request: Request,
    ) -> Result<Response, FetchError> {
        match self.network(&request).await {
            Ok(response) => {
                self.populate(cache, &request, &response);
                Ok(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                self.cached(&request)
                    .await
                    .ok_or_else(|| FetchError::NoCachedResponse {
                        url: request.url.to_string(),
                        source: e,
                    })
            }
        }
    }

    /// Cached copy when there is one, otherwise wait for the network. The network
    /// fetch always runs and refreshes the cache.
    async fn stale_while_revalidate(
        &self,
        cache: Arc<Cache>,
        request: Request,
    ) -> Result<Response, FetchError> {
        let Some(hit) = self.cached(&request).await else {
            let response = self
                .network(&request)
                .await
                .map_err(|e| network_failure(&request, e))?;
            self.populate(cache, &request, &response);
            return Ok(response);
        };

        debug!(url = %request.url, "Serving stale copy while revalidating");
        let fetcher = Arc::clone(&self.fetcher);
        let lifetime = self.lifetime.clone();
        self.lifetime.wait_until("revalidate", async move {
            let response = fetcher.fetch(&request).await?;
            store(&lifetime, cache, &request, &response);
            Ok::<_, NetError>(())
        });
        Ok(hit)
    }
}

/// Write a qualifying response to `cache` on the extended lifetime.
///
/// Failures reach the host as `cache-put` errors. A generation evicted in the
/// meantime is skipped quietly.
fn store(lifetime: &ExtendedLifetime, cache: Arc<Cache>, request: &Request, response: &Response) {
    if request.method != Method::GET || !is_cacheable(response) {
        trace!(url = %request.url, status = %response.status, "Response not cacheable");
        return;
    }
    let request = request.clone();
    let copy = response.clone();
    lifetime.wait_until("cache-put", async move {
        match cache.put(&request, copy).await {
            Err(CacheError::Evicted(generation)) => {
                debug!(url = %request.url, %generation, "Generation evicted, dropping write");
                Ok(())
            }
            other => other,
        }
    });
}

fn network_failure(request: &Request, source: NetError) -> FetchError {
    debug!(url = %request.url, error = %source, "Network request failed");
    FetchError::Network {
        url: request.url.to_string(),
        source,
    }
}
