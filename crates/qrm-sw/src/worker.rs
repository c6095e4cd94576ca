//! Event dispatch and the clients registry.
//!
//! The host's event loop hands each event to [`ServiceWorker::handle_event`]
//! and must await the returned future before tearing the task down; that
//! future is the keep-alive signal for long-running handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use qrm_fetch::{Fetcher, Request, Response};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::lifecycle::{LifecycleController, WorkerPhase};
use crate::maintenance::{Maintenance, SyncHandler};
use crate::message::{NotificationPayload, VersionInfo, WorkerMessage};
use crate::router::RequestRouter;
use crate::{SwError, WorkerConfig};

/// A controlled page.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,
    /// Page URL.
    pub url: Url,
    /// Whether the page is focused.
    pub focused: bool,
    /// Whether this worker controls the page.
    pub controlled: bool,
}

/// Registry of open pages.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// All known clients.
    pub fn match_all(&self) -> Vec<&Client> {
        self.clients.values().collect()
    }

    /// Open a new window at the given URL.
    pub fn open_window(&mut self, url: Url) -> Client {
        let client = Client {
            id: next_client_id(),
            url,
            focused: true,
            controlled: true,
        };
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Take control of every open page immediately, without waiting for a
    /// reload. Returns the number of clients claimed.
    pub fn claim(&mut self) -> usize {
        for client in self.clients.values_mut() {
            client.controlled = true;
        }
        self.clients.len()
    }

    /// Remove a departed client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// An event delivered by the host.
#[derive(Debug)]
pub enum WorkerEvent {
    /// First run of a new deployment: precache static assets.
    Install,
    /// Deployment takeover: evict stale partitions, claim clients.
    Activate,
    /// An intercepted network request.
    Fetch(Request),
    /// Background sync fired (e.g. on reconnect).
    Sync { tag: String },
    /// Periodic background sync fired.
    PeriodicSync { tag: String },
    /// Message from a controlled page, with an optional reply channel.
    Message {
        message: WorkerMessage,
        reply_to: Option<oneshot::Sender<VersionInfo>>,
    },
    /// Push received, with optional body text.
    Push(Option<String>),
    /// User clicked a notification action.
    NotificationClick { action: String },
}

/// Result of handling an event.
#[derive(Debug)]
pub enum EventOutcome {
    /// Handler finished with nothing for the host to do.
    Done,
    /// Answer to a fetch event; `None` lets the request pass through.
    Response(Option<Response>),
    /// A notification the host should display.
    Notification(NotificationPayload),
}

/// The worker: owns the cache partitions and dispatches host events to the
/// lifecycle controller, request router, and maintenance jobs.
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    clients: Arc<RwLock<Clients>>,
    fetcher: Arc<dyn Fetcher>,
    lifecycle: RwLock<LifecycleController>,
    router: RequestRouter,
    maintenance: Maintenance,
}

impl ServiceWorker {
    /// Create a worker for the given configuration and network seam.
    pub fn new(config: WorkerConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let config = Arc::new(config);
        let storage = Arc::new(RwLock::new(CacheStorage::new()));
        let clients = Arc::new(RwLock::new(Clients::new()));

        let lifecycle =
            LifecycleController::new(config.clone(), storage.clone(), clients.clone());
        let router = RequestRouter::new(config.clone(), storage.clone(), fetcher.clone());
        let maintenance = Maintenance::new(config.clone(), storage);

        Self {
            config,
            clients,
            fetcher,
            lifecycle: RwLock::new(lifecycle),
            router,
            maintenance,
        }
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> WorkerPhase {
        self.lifecycle.read().await.phase()
    }

    /// The deployed version identifier (the static partition name).
    pub fn version(&self) -> &str {
        &self.config.static_cache_name
    }

    /// The clients registry.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        self.clients.clone()
    }

    /// Register an application-layer sync handler.
    pub fn register_sync_handler(&mut self, handler: Arc<dyn SyncHandler>) {
        self.maintenance.register(handler);
    }

    /// Dispatch a host event.
    ///
    /// The returned future must be awaited to completion; handlers perform
    /// their asynchronous work inside it.
    pub async fn handle_event(&self, event: WorkerEvent) -> Result<EventOutcome, SwError> {
        match event {
            WorkerEvent::Install => {
                self.lifecycle
                    .write()
                    .await
                    .install(self.fetcher.as_ref())
                    .await?;
                Ok(EventOutcome::Done)
            }
            WorkerEvent::Activate => {
                self.lifecycle.write().await.activate().await?;
                Ok(EventOutcome::Done)
            }
            WorkerEvent::Fetch(request) => {
                let response = self.router.handle(&request).await?;
                Ok(EventOutcome::Response(response))
            }
            WorkerEvent::Sync { tag } => {
                self.maintenance.handle_sync(&tag).await;
                Ok(EventOutcome::Done)
            }
            WorkerEvent::PeriodicSync { tag } => {
                self.maintenance.handle_periodic_sync(&tag).await;
                Ok(EventOutcome::Done)
            }
            WorkerEvent::Message { message, reply_to } => {
                self.handle_message(message, reply_to).await?;
                Ok(EventOutcome::Done)
            }
            WorkerEvent::Push(body) => {
                let payload = match body {
                    Some(text) => NotificationPayload::new(text),
                    None => NotificationPayload::default(),
                };
                info!(title = %payload.title, "Push received");
                Ok(EventOutcome::Notification(payload))
            }
            WorkerEvent::NotificationClick { action } => {
                debug!(action = %action, "Notification clicked");
                if action == "explore" {
                    let root = self
                        .config
                        .origin
                        .join("/")
                        .map_err(|e| SwError::InvalidState(format!("Invalid origin: {e}")))?;
                    self.clients.write().await.open_window(root);
                }
                Ok(EventOutcome::Done)
            }
        }
    }

    async fn handle_message(
        &self,
        message: WorkerMessage,
        reply_to: Option<oneshot::Sender<VersionInfo>>,
    ) -> Result<(), SwError> {
        debug!(?message, "Message received");
        match message {
            WorkerMessage::SkipWaiting => {
                let mut lifecycle = self.lifecycle.write().await;
                lifecycle.skip_waiting();
                if lifecycle.phase() == WorkerPhase::Installed {
                    lifecycle.activate().await?;
                }
                Ok(())
            }
            WorkerMessage::GetVersion => {
                if let Some(reply) = reply_to {
                    // The page may have navigated away; a dropped receiver
                    // is not an error.
                    let _ = reply.send(VersionInfo {
                        version: self.version().to_string(),
                    });
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qrm_fetch::FetchError;

    /// Fetcher that always fails, for tests that never reach the network.
    struct OfflineFetcher;

    #[async_trait]
    impl Fetcher for OfflineFetcher {
        async fn fetch(&self, _request: &Request) -> Result<Response, FetchError> {
            Err(FetchError::ConnectionFailed("offline".into()))
        }
    }

    fn worker() -> ServiceWorker {
        let origin = Url::parse("https://qr.example.com").unwrap();
        let config = WorkerConfig::for_version(origin, "2.0.0");
        ServiceWorker::new(config, Arc::new(OfflineFetcher))
    }

    #[test]
    fn test_clients_open_and_claim() {
        let mut clients = Clients::new();
        let client = clients.open_window(Url::parse("https://qr.example.com/").unwrap());

        assert!(client.focused);
        assert!(clients.get(&client.id).is_some());
        assert_eq!(clients.claim(), 1);
        assert!(clients.remove(&client.id).is_some());
        assert_eq!(clients.match_all().len(), 0);
    }

    #[test]
    fn test_client_ids_unique() {
        let mut clients = Clients::new();
        let url = Url::parse("https://qr.example.com/").unwrap();
        let a = clients.open_window(url.clone());
        let b = clients.open_window(url);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_get_version_replies_with_partition_name() {
        let worker = worker();
        let (tx, rx) = oneshot::channel();

        worker
            .handle_event(WorkerEvent::Message {
                message: WorkerMessage::GetVersion,
                reply_to: Some(tx),
            })
            .await
            .unwrap();

        let info = rx.await.unwrap();
        assert_eq!(info.version, "qr-master-static-v2.0.0");
    }

    #[tokio::test]
    async fn test_get_version_with_dropped_receiver() {
        let worker = worker();
        let (tx, rx) = oneshot::channel();
        drop(rx);

        // Must not error when nobody is listening.
        worker
            .handle_event(WorkerEvent::Message {
                message: WorkerMessage::GetVersion,
                reply_to: Some(tx),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_push_produces_notification() {
        let worker = worker();

        let outcome = worker
            .handle_event(WorkerEvent::Push(Some("Scan complete".to_string())))
            .await
            .unwrap();

        match outcome {
            EventOutcome::Notification(payload) => {
                assert_eq!(payload.title, "QR Master");
                assert_eq!(payload.body, "Scan complete");
            }
            other => panic!("Expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_notification_click_explore_opens_root() {
        let worker = worker();

        worker
            .handle_event(WorkerEvent::NotificationClick {
                action: "explore".to_string(),
            })
            .await
            .unwrap();

        let clients = worker.clients();
        let clients = clients.read().await;
        let all = clients.match_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].url.as_str(), "https://qr.example.com/");
    }

    #[tokio::test]
    async fn test_notification_click_close_is_noop() {
        let worker = worker();

        worker
            .handle_event(WorkerEvent::NotificationClick {
                action: "close".to_string(),
            })
            .await
            .unwrap();

        let clients = worker.clients();
        assert!(clients.read().await.match_all().is_empty());
    }

    #[tokio::test]
    async fn test_skip_waiting_before_install_is_recorded() {
        let worker = worker();

        worker
            .handle_event(WorkerEvent::Message {
                message: WorkerMessage::SkipWaiting,
                reply_to: None,
            })
            .await
            .unwrap();

        // Nothing was installed, so the phase is unchanged.
        assert_eq!(worker.phase().await, WorkerPhase::Parsed);
    }
}
