//! # QRM Service Worker
//!
//! Offline caching and update-lifecycle core for the QR Master worker.
//!
//! ## Features
//!
//! - **Cache partitions**: named request → response stores, versioned per
//!   deployment
//! - **Lifecycle**: atomic install-time precaching, stale-partition
//!   eviction on activation, immediate client takeover
//! - **Request routing**: navigation fallback and cache-first with
//!   background refresh
//! - **Maintenance**: retention-based cleanup and background-sync handlers
//! - **Messaging**: skip-waiting and version queries from controlled pages
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker (event dispatch)
//!     ├── LifecycleController ──── install / activate ──→ CacheStorage
//!     ├── RequestRouter ────────── fetch ───────────────→ CacheStorage
//!     │                                └── Fetcher (network seam)
//!     ├── Maintenance ──────────── sync / periodicsync ─→ SyncHandler
//!     └── Clients ──────────────── claim / openWindow
//!
//! CacheStorage
//!     └── CachePartition (qr-master-static-vX / qr-master-dynamic-vX)
//!             └── url → CacheEntry
//! ```
//!
//! Every event handler returns a future the host must await to completion
//! before tearing the worker down; that returned future is the keep-alive
//! signal.

use std::time::Duration;

use thiserror::Error;
use url::Url;

pub mod cache;
pub mod lifecycle;
pub mod maintenance;
pub mod message;
pub mod router;
pub mod worker;

pub use cache::{CacheEntry, CachePartition, CacheStorage};
pub use lifecycle::{LifecycleController, WorkerPhase};
pub use maintenance::{Maintenance, SyncHandler, CLEANUP_TAG, HISTORY_SYNC_TAG};
pub use message::{NotificationAction, NotificationPayload, VersionInfo, WorkerMessage};
pub use router::{classify, RequestRouter, RouteClass};
pub use worker::{Client, Clients, EventOutcome, ServiceWorker, WorkerEvent};

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    /// Install-fatal: a manifest asset failed to fetch; no partial cache
    /// is retained.
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] qrm_fetch::FetchError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sync error: {0}")]
    Sync(String),
}

/// Default retention window for dynamic-cache entries.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Assets precached at install time.
pub const STATIC_ASSETS: [&str; 5] = [
    "/",
    "/index.html",
    "/manifest.json",
    "/icon-192.png",
    "/icon-512.png",
];

/// Process-wide worker configuration, initialized once at startup and
/// passed explicitly into each component.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name of the install-time asset partition.
    pub static_cache_name: String,
    /// Name of the runtime response partition.
    pub dynamic_cache_name: String,
    /// Retention window for dynamic-cache entries.
    pub retention: Duration,
    /// Paths fetched verbatim at install time.
    pub static_assets: Vec<String>,
    /// The application's own origin; requests elsewhere pass through.
    pub origin: Url,
}

impl WorkerConfig {
    /// Create a configuration for the current crate version.
    pub fn new(origin: Url) -> Self {
        Self::for_version(origin, env!("CARGO_PKG_VERSION"))
    }

    /// Create a configuration for a specific deployed version.
    ///
    /// Partition names embed the version; bumping it triggers eviction of
    /// the previous deployment's partitions on activation.
    pub fn for_version(origin: Url, version: &str) -> Self {
        Self {
            static_cache_name: format!("qr-master-static-v{version}"),
            dynamic_cache_name: format!("qr-master-dynamic-v{version}"),
            retention: DEFAULT_RETENTION,
            static_assets: STATIC_ASSETS.iter().map(|s| s.to_string()).collect(),
            origin,
        }
    }

    /// Set the retention window.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}
