//! Install/activate lifecycle: atomic precaching, stale-partition
//! eviction, and client takeover.

use std::sync::Arc;

use qrm_fetch::{Fetcher, Request};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::cache::{CacheEntry, CacheStorage};
use crate::worker::Clients;
use crate::{SwError, WorkerConfig};

/// Installation phase of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerPhase {
    /// Script parsed, nothing run yet.
    #[default]
    Parsed,
    /// Install handler running.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Activate handler running.
    Activating,
    /// Active and controlling clients.
    Activated,
    /// Install failed or replaced by a newer worker.
    Redundant,
}

/// Governs install/activate transitions and old-cache eviction.
pub struct LifecycleController {
    config: Arc<WorkerConfig>,
    storage: Arc<RwLock<CacheStorage>>,
    clients: Arc<RwLock<Clients>>,
    phase: WorkerPhase,
    skip_waiting: bool,
}

impl LifecycleController {
    /// Create a controller.
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<RwLock<CacheStorage>>,
        clients: Arc<RwLock<Clients>>,
    ) -> Self {
        Self {
            config,
            storage,
            clients,
            phase: WorkerPhase::Parsed,
            skip_waiting: false,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    /// Whether immediate takeover was requested.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    /// Request that this worker take effect without waiting for existing
    /// clients to close.
    pub fn skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    /// Install: fetch every manifest asset and populate the static
    /// partition.
    ///
    /// All-or-nothing: responses are staged and committed only once every
    /// fetch has succeeded with a success status. Any failure aborts the
    /// install with no partial population and no automatic retry.
    pub async fn install(&mut self, fetcher: &dyn Fetcher) -> Result<(), SwError> {
        info!("Worker installing");
        self.phase = WorkerPhase::Installing;

        let mut staged = Vec::with_capacity(self.config.static_assets.len());
        for path in &self.config.static_assets {
            let url = self
                .config
                .origin
                .join(path)
                .map_err(|e| SwError::InstallFailed(format!("{path}: {e}")))?;
            let request = Request::get(url);

            let response = match fetcher.fetch(&request).await {
                Ok(response) if response.ok() => response,
                Ok(response) => {
                    self.phase = WorkerPhase::Redundant;
                    error!(asset = %path, status = %response.status, "Install fetch returned error status");
                    return Err(SwError::InstallFailed(format!(
                        "{path}: status {}",
                        response.status
                    )));
                }
                Err(e) => {
                    self.phase = WorkerPhase::Redundant;
                    error!(asset = %path, error = %e, "Install fetch failed");
                    return Err(SwError::InstallFailed(format!("{path}: {e}")));
                }
            };

            staged.push(CacheEntry::from_parts(&request, &response));
        }

        let mut storage = self.storage.write().await;
        let cache = storage.open(&self.config.static_cache_name);
        for entry in staged {
            cache.put(entry);
        }
        drop(storage);

        self.phase = WorkerPhase::Installed;
        self.skip_waiting();
        info!(cache = %self.config.static_cache_name, assets = self.config.static_assets.len(), "Static assets cached");
        Ok(())
    }

    /// Activate: evict every partition that does not belong to the current
    /// version, then claim all open clients.
    ///
    /// Eviction failures are logged and do not block activation.
    pub async fn activate(&mut self) -> Result<(), SwError> {
        info!("Worker activating");
        self.phase = WorkerPhase::Activating;

        let mut storage = self.storage.write().await;
        let stale: Vec<String> = storage
            .keys()
            .into_iter()
            .filter(|name| {
                name != &self.config.static_cache_name && name != &self.config.dynamic_cache_name
            })
            .collect();

        for name in stale {
            if storage.delete(&name) {
                info!(cache = %name, "Deleted old cache");
            } else {
                warn!(cache = %name, "Failed to delete old cache");
            }
        }
        drop(storage);

        let claimed = self.clients.write().await.claim();
        self.phase = WorkerPhase::Activated;
        info!(claimed, "Worker activated");
        Ok(())
    }
}
