//! Request classification and fetch-strategy dispatch.

use std::sync::Arc;

use qrm_fetch::{Destination, Fetcher, Request, Response};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage};
use crate::{SwError, WorkerConfig};

/// Inline document served when navigation fails with no cached root.
pub const OFFLINE_PAGE: &str = "<!DOCTYPE html><html><head><title>Offline</title></head>\
<body><h1>You are offline</h1><p>Please check your internet connection.</p></body></html>";

/// Inline vector image served when an image fetch fails.
pub const IMAGE_PLACEHOLDER: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#f3f4f6"/><text x="100" y="100" text-anchor="middle" fill="#6b7280">Image unavailable</text></svg>"##;

/// Classification of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Pass through untouched (non-GET or cross-origin).
    Ignore,
    /// Top-level HTML document load.
    Navigation,
    /// Same-origin GET sub-resource.
    Resource,
}

/// Classify a request against the application origin.
pub fn classify(request: &Request, origin: &Url) -> RouteClass {
    if request.method != http::Method::GET {
        return RouteClass::Ignore;
    }
    if request.url.origin() != origin.origin() {
        return RouteClass::Ignore;
    }
    if request.is_navigation() {
        RouteClass::Navigation
    } else {
        RouteClass::Resource
    }
}

/// Dispatches intercepted requests to a fetch strategy.
///
/// Cloneable so background refreshes can outlive the originating fetch
/// event; there is no cancellation for in-flight refreshes.
#[derive(Clone)]
pub struct RequestRouter {
    config: Arc<WorkerConfig>,
    storage: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
}

impl RequestRouter {
    /// Create a router.
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<RwLock<CacheStorage>>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
        }
    }

    /// Handle an intercepted request.
    ///
    /// Returns `Ok(None)` when the request is not ours to answer; the host
    /// lets it proceed to the network untouched.
    pub async fn handle(&self, request: &Request) -> Result<Option<Response>, SwError> {
        match classify(request, &self.config.origin) {
            RouteClass::Ignore => {
                trace!(url = %request.url, method = %request.method, "Request ignored");
                Ok(None)
            }
            RouteClass::Navigation => self.handle_navigation(request).await.map(Some),
            RouteClass::Resource => self.handle_resource(request).await.map(Some),
        }
    }

    /// Navigation strategy: cached root, then network, then offline page.
    async fn handle_navigation(&self, request: &Request) -> Result<Response, SwError> {
        let root = self.root_url()?;

        if let Some(entry) = self.storage.read().await.match_request(root.as_str()) {
            debug!(url = %request.url, "Navigation served from cache");
            return Ok(entry.to_response());
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_cacheable(request, &response).await;
                Ok(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Navigation fetch failed, falling back");
                // Install may have populated the root since the first lookup.
                if let Some(entry) = self.storage.read().await.match_request(root.as_str()) {
                    return Ok(entry.to_response());
                }
                Ok(Response::synthetic(root, "text/html", OFFLINE_PAGE))
            }
        }
    }

    /// Resource strategy: cache-first with non-blocking background refresh.
    async fn handle_resource(&self, request: &Request) -> Result<Response, SwError> {
        let key = request.url.to_string();

        if let Some(entry) = self.storage.read().await.match_request(&key) {
            debug!(url = %request.url, "Resource served from cache");
            let response = entry.to_response();

            // Refresh concurrently; the cached value has already been
            // served, so refresh failures are swallowed.
            let router = self.clone();
            let refresh_request = request.clone();
            tokio::spawn(async move {
                router.refresh(&refresh_request).await;
            });

            return Ok(response);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_cacheable(request, &response).await;
                Ok(response)
            }
            Err(e) => {
                if request.destination == Destination::Image {
                    warn!(url = %request.url, error = %e, "Image fetch failed, serving placeholder");
                    return Ok(Response::synthetic(
                        request.url.clone(),
                        "image/svg+xml",
                        IMAGE_PLACEHOLDER,
                    ));
                }
                Err(e.into())
            }
        }
    }

    /// Re-fetch a cached resource and update the dynamic partition.
    ///
    /// Last completed write wins when racing another writer on the same
    /// key.
    pub async fn refresh(&self, request: &Request) {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_cacheable(request, &response).await;
                trace!(url = %request.url, "Background refresh complete");
            }
            Err(e) => {
                trace!(url = %request.url, error = %e, "Background refresh failed");
            }
        }
    }

    /// Store a clone in the dynamic partition when the status is a
    /// success. Error and redirect responses are never cached.
    async fn store_if_cacheable(&self, request: &Request, response: &Response) {
        if !response.ok() {
            trace!(url = %request.url, status = %response.status, "Response not cacheable");
            return;
        }
        let entry = CacheEntry::from_parts(request, response);
        self.storage
            .write()
            .await
            .open(&self.config.dynamic_cache_name)
            .put(entry);
    }

    fn root_url(&self) -> Result<Url, SwError> {
        self.config
            .origin
            .join("/")
            .map_err(|e| SwError::InvalidState(format!("Invalid origin: {e}")))
    }
}
