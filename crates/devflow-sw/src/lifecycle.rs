//! Install / activate lifecycle.
//!
//! Install pre-caches every static asset or nothing: all fetches complete
//! before the static partition is touched, and a single failed asset aborts
//! the step with the partition unchanged. Activation drops every partition
//! that does not carry the current version and claims all open pages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use devflow_net::{Fetcher, Request};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::cache::SharedCacheStorage;
use crate::clients::SharedClients;
use crate::config::WorkerConfig;
use crate::{Result, ServiceWorkerError};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, not yet installed.
    #[default]
    Parsed,
    /// Install in progress.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate in progress.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed. Install may be retried.
    Redundant,
}

impl WorkerState {
    /// Whether an install may start from this state.
    pub fn can_install(self) -> bool {
        matches!(
            self,
            WorkerState::Parsed | WorkerState::Installed | WorkerState::Redundant
        )
    }
}

/// Drives install and activation over the shared partitions.
pub struct LifecycleController {
    config: Arc<WorkerConfig>,
    storage: SharedCacheStorage,
    fetcher: Arc<dyn Fetcher>,
    clients: SharedClients,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
}

impl LifecycleController {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: SharedCacheStorage,
        fetcher: Arc<dyn Fetcher>,
        clients: SharedClients,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
            clients,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: WorkerState) {
        let mut current = self.state.write().await;
        debug!(from = ?*current, to = ?state, "Worker state change");
        *current = state;
    }

    // ==================== Install ====================

    /// Fetch every static asset and commit them to the static partition in
    /// one write. Any transport failure or non-ok status fails the whole
    /// step and leaves the worker `Redundant`.
    ///
    /// On success the skip-waiting signal is raised. Returns the number of
    /// assets stored.
    pub async fn install(&self) -> Result<usize> {
        {
            let mut state = self.state.write().await;
            if !state.can_install() {
                return Err(ServiceWorkerError::InvalidState(format!(
                    "cannot install from {:?}",
                    *state
                )));
            }
            *state = WorkerState::Installing;
        }
        info!(version = %self.config.cache_version, "Installing");

        match self.precache().await {
            Ok(count) => {
                self.set_state(WorkerState::Installed).await;
                self.skip_waiting.store(true, Ordering::SeqCst);
                info!(assets = count, "Static assets cached");
                Ok(count)
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<usize> {
        let urls = self.config.static_asset_urls()?;

        let fetches = urls.into_iter().map(|url| {
            let fetcher = Arc::clone(&self.fetcher);
            async move {
                let request = Request::get(url);
                match fetcher.fetch(request.clone()).await {
                    Ok(response) if response.ok() => Ok((request, response)),
                    Ok(response) => Err(ServiceWorkerError::InstallAssetFailure {
                        url: request.url.to_string(),
                        reason: format!("HTTP {}", response.status),
                    }),
                    Err(e) => Err(ServiceWorkerError::InstallAssetFailure {
                        url: request.url.to_string(),
                        reason: e.to_string(),
                    }),
                }
            }
        });
        let fetched = try_join_all(fetches).await?;

        let cache_name = self.config.static_cache_name();
        let mut storage = self.storage.write().await;
        let cache = storage.open(&cache_name);
        for (request, response) in &fetched {
            cache.put(request, response);
        }
        Ok(fetched.len())
    }

    // ==================== Activate ====================

    /// Ask for activation without waiting for older instances. Returns true
    /// when the worker is installed and can activate now.
    pub async fn skip_waiting(&self) -> bool {
        self.skip_waiting.store(true, Ordering::SeqCst);
        self.state().await == WorkerState::Installed
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Delete every partition outside the current version, then claim all
    /// open pages. Returns the deleted partition names.
    pub async fn activate(&self) -> Result<Vec<String>> {
        {
            let mut state = self.state.write().await;
            if *state != WorkerState::Installed {
                return Err(ServiceWorkerError::InvalidState(format!(
                    "cannot activate from {:?}",
                    *state
                )));
            }
            *state = WorkerState::Activating;
        }

        let deleted = self.clear_stale_caches().await;
        let claimed = self.clients.write().await.claim();

        self.skip_waiting.store(false, Ordering::SeqCst);
        self.set_state(WorkerState::Activated).await;
        info!(deleted = deleted.len(), claimed, "Activated");
        Ok(deleted)
    }

    /// Pick up a generation installed by an earlier run: if storage already
    /// holds the current static partition, go straight to `Activated`.
    pub async fn resume(&self) -> bool {
        let installed = self
            .storage
            .read()
            .await
            .get(&self.config.static_cache_name())
            .is_some_and(|cache| !cache.is_empty());
        if !installed {
            return false;
        }

        let mut state = self.state.write().await;
        if *state != WorkerState::Parsed {
            return false;
        }
        *state = WorkerState::Activated;
        drop(state);

        self.clients.write().await.claim();
        info!(version = %self.config.cache_version, "Resumed installed generation");
        true
    }

    // ==================== Maintenance ====================

    /// Delete every partition whose name is not one of the current three.
    pub async fn clear_stale_caches(&self) -> Vec<String> {
        let config = &self.config;
        let deleted = self
            .storage
            .write()
            .await
            .retain(|name| config.is_current_cache(name));
        if deleted.is_empty() {
            debug!("No stale caches");
        }
        deleted
    }

    /// Sum of every stored body across all partitions. Full scan.
    pub async fn cache_size(&self) -> u64 {
        let size = self.storage.read().await.total_body_bytes();
        debug!(bytes = size, "Computed cache size");
        size
    }
}
