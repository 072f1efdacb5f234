//! Caching strategies.
//!
//! Each strategy always produces a response. Network failures and cache
//! misses fall through to the next step and finally to the
//! [`OfflineResponder`].

use std::sync::Arc;

use devflow_common::Clock;
use devflow_net::{Fetcher, Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::annotate::{self, Freshness};
use crate::cache::SharedCacheStorage;
use crate::config::{ExpiredEntryPolicy, WorkerConfig};
use crate::offline::OfflineResponder;
use crate::route::Route;
use crate::{Result, ServiceWorkerError};

/// The three caching strategies over shared partitions.
///
/// Clone is cheap; all state is behind `Arc`s.
#[derive(Clone)]
pub struct Strategies {
    config: Arc<WorkerConfig>,
    storage: SharedCacheStorage,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    offline: OfflineResponder,
}

impl Strategies {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: SharedCacheStorage,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let offline = OfflineResponder::new(&config);
        Self {
            config,
            storage,
            fetcher,
            clock,
            offline,
        }
    }

    pub fn offline(&self) -> &OfflineResponder {
        &self.offline
    }

    /// Run the strategy for `route`. `None` means the request is not
    /// intercepted.
    pub async fn respond(&self, route: Route, request: &Request) -> Option<Response> {
        match route {
            Route::Passthrough => None,
            Route::CacheFirst => Some(self.cache_first(request).await),
            Route::NetworkFirstWithExpiry => Some(self.network_first_with_expiry(request).await),
            Route::NetworkFirst => Some(self.network_first(request).await),
        }
    }

    // ==================== Cache First ====================

    /// Static partition first. A hit is returned at once and refreshed in
    /// the background; a miss goes to the network and successful answers
    /// are stored.
    pub async fn cache_first(&self, request: &Request) -> Response {
        let cache_name = self.config.static_cache_name();

        let cached = self.storage.read().await.match_in(&cache_name, request);
        if let Some(response) = cached {
            debug!(url = %request.url, cache = %cache_name, "Cache hit");
            self.revalidate_in_background(request.clone());
            return response;
        }

        debug!(url = %request.url, cache = %cache_name, "Cache miss, fetching");
        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.ok() {
                    self.store(&cache_name, request, &response);
                }
                response
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache-first fetch failed");
                self.offline.respond(&request.url)
            }
        }
    }

    /// Re-fetch `request` and overwrite the static entry on success.
    /// Nobody waits on the returned task; failures are logged and dropped.
    pub(crate) fn revalidate_in_background(&self, request: Request) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let cache_name = this.config.static_cache_name();
            match this.fetcher.fetch(request.clone()).await {
                Ok(response) if response.ok() => {
                    if let Some(pending) = this.store(&cache_name, &request, &response) {
                        let _ = pending.await;
                    }
                    debug!(url = %request.url, "Background cache update stored");
                }
                Ok(response) => {
                    debug!(url = %request.url, status = %response.status, "Background cache update skipped");
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Background cache update failed");
                }
            }
        })
    }

    // ==================== Network First With Expiry ====================

    /// Network first. Successful answers are stamped and stored in the API
    /// partition; the caller gets the unstamped original and never waits on
    /// the store. On network failure a cached answer inside the freshness
    /// window is returned with the offline marker.
    pub async fn network_first_with_expiry(&self, request: &Request) -> Response {
        let cache_name = self.config.api_cache_name();

        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.ok() {
                    let stamped = annotate::stamp_capture_time(&response, self.clock.now_millis());
                    self.store(&cache_name, request, &stamped);
                }
                response
            }
            Err(e) => {
                info!(url = %request.url, error = %e, "Network failed for API request, trying cache");
                match self.cached_api_response(request).await {
                    Ok(response) => response,
                    Err(ServiceWorkerError::StaleEntry { key, age_ms }) => {
                        info!(key = %key, age_ms = ?age_ms, "Cached API response expired");
                        self.offline.respond(&request.url)
                    }
                    Err(e) => {
                        debug!(url = %request.url, error = %e, "No cached API response");
                        self.offline.respond(&request.url)
                    }
                }
            }
        }
    }

    async fn cached_api_response(&self, request: &Request) -> Result<Response> {
        let cache_name = self.config.api_cache_name();
        let key = request.cache_key();

        let cached = self
            .storage
            .read()
            .await
            .match_in(&cache_name, request)
            .ok_or_else(|| ServiceWorkerError::CacheMiss(key.clone()))?;

        let now = self.clock.now_millis();
        match annotate::freshness(&cached, now, self.config.api_freshness()) {
            Freshness::Fresh { age_ms } => {
                debug!(key = %key, age_ms, "Serving cached API response while offline");
                Ok(annotate::mark_offline(&cached))
            }
            Freshness::Expired { age_ms } => {
                self.expire(&cache_name, request).await;
                Err(ServiceWorkerError::StaleEntry {
                    key,
                    age_ms: Some(age_ms),
                })
            }
            Freshness::Unstamped => {
                self.expire(&cache_name, request).await;
                Err(ServiceWorkerError::StaleEntry { key, age_ms: None })
            }
        }
    }

    async fn expire(&self, cache_name: &str, request: &Request) {
        if self.config.expired_api_policy == ExpiredEntryPolicy::Evict {
            let mut storage = self.storage.write().await;
            if storage.open(cache_name).delete(request) {
                debug!(url = %request.url, cache = cache_name, "Evicted expired API response");
            }
        }
    }

    // ==================== Network First ====================

    /// Network first, dynamic partition on failure. No expiry.
    pub async fn network_first(&self, request: &Request) -> Response {
        let cache_name = self.config.dynamic_cache_name();

        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.ok() {
                    self.store(&cache_name, request, &response);
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying dynamic cache");
                let cached = self.storage.read().await.match_in(&cache_name, request);
                cached.unwrap_or_else(|| self.offline.respond(&request.url))
            }
        }
    }

    /// Store without making the caller wait on the write lock. An
    /// uncontended write lands before this returns; otherwise it is handed
    /// to a task that waits for the lock.
    fn store(
        &self,
        cache_name: &str,
        request: &Request,
        response: &Response,
    ) -> Option<JoinHandle<()>> {
        if let Ok(mut storage) = self.storage.try_write() {
            storage.open(cache_name).put(request, response);
            return None;
        }

        debug!(url = %request.url, cache = cache_name, "Cache busy, deferring store");
        let storage = Arc::clone(&self.storage);
        let cache_name = cache_name.to_string();
        let request = request.clone();
        let response = response.clone();
        Some(tokio::spawn(async move {
            storage.write().await.open(&cache_name).put(&request, &response);
        }))
    }
}
