//! Background maintenance: retention-based cleanup of the dynamic
//! partition and sync-tag dispatch.

use std::sync::Arc;
use std::time::SystemTime;

use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::{SwError, WorkerConfig};

/// Sync tag scheduled on reconnect to reconcile offline history writes.
pub const HISTORY_SYNC_TAG: &str = "qr-history-sync";

/// Periodic sync tag for dynamic-cache cleanup.
pub const CLEANUP_TAG: &str = "qr-cleanup";

/// Handler for a named background-sync tag.
///
/// The worker core carries no reconciliation logic of its own; the
/// application layer registers handlers for the tags it cares about.
pub trait SyncHandler: Send + Sync {
    /// The tag this handler answers to.
    fn tag(&self) -> &str;

    /// Run the sync work.
    fn run(&self) -> Result<(), SwError>;
}

/// Periodic and background-sync jobs.
///
/// Handler failures are logged and swallowed; maintenance never crashes
/// the worker.
pub struct Maintenance {
    config: Arc<WorkerConfig>,
    storage: Arc<RwLock<CacheStorage>>,
    handlers: HashMap<String, Arc<dyn SyncHandler>>,
}

impl Maintenance {
    /// Create the maintenance registry.
    pub fn new(config: Arc<WorkerConfig>, storage: Arc<RwLock<CacheStorage>>) -> Self {
        Self {
            config,
            storage,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for its sync tag, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn SyncHandler>) {
        self.handlers.insert(handler.tag().to_string(), handler);
    }

    /// Dispatch a background-sync event (fires on reconnect).
    pub async fn handle_sync(&self, tag: &str) {
        debug!(tag, "Background sync");
        self.run_handler(tag);
    }

    /// Dispatch a periodic-sync event.
    pub async fn handle_periodic_sync(&self, tag: &str) {
        debug!(tag, "Periodic sync");
        if tag == CLEANUP_TAG {
            let removed = self.cleanup().await;
            info!(removed, "Cleanup completed");
            return;
        }
        self.run_handler(tag);
    }

    /// Delete dynamic-partition entries whose date metadata is older than
    /// the retention window.
    ///
    /// Entries without date metadata are retained, never guessed-expired.
    /// Idempotent and safe to run alongside request handling.
    pub async fn cleanup(&self) -> usize {
        let cutoff = SystemTime::now() - self.config.retention;

        let mut storage = self.storage.write().await;
        if !storage.has(&self.config.dynamic_cache_name) {
            return 0;
        }
        let cache = storage.open(&self.config.dynamic_cache_name);

        let expired: Vec<String> = cache
            .keys()
            .into_iter()
            .filter(|url| {
                cache
                    .match_request(url)
                    .and_then(|entry| entry.date)
                    .is_some_and(|date| date < cutoff)
            })
            .collect();

        let mut removed = 0;
        for url in expired {
            if cache.delete(&url) {
                debug!(url = %url, "Evicted stale entry");
                removed += 1;
            }
        }
        removed
    }

    fn run_handler(&self, tag: &str) {
        match self.handlers.get(tag) {
            Some(handler) => {
                if let Err(e) = handler.run() {
                    warn!(tag, error = %e, "Sync handler failed");
                }
            }
            None => debug!(tag, "No handler registered"),
        }
    }
}
