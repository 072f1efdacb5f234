//! # DevFlow Service Worker
//!
//! Offline caching worker for the DevFlow dashboard.
//!
//! ## Features
//!
//! - **Routing**: every intercepted GET is classified by origin and mapped to
//!   a caching strategy
//! - **Strategies**: cache-first with background revalidation,
//!   network-first with a freshness window for GitHub API responses, and
//!   plain network-first for everything else
//! - **Partitions**: named, versioned caches (`static`, `dynamic`, `api`)
//!   with generational cleanup on activation
//! - **Offline responses**: synthetic HTML/JSON/text fallbacks when neither
//!   network nor cache can answer
//! - **Lifecycle**: install, activate, skip-waiting and runtime messages
//! - **Background sync / push**: best-effort notifications to open clients
//!
//! ## Architecture
//!
//! ```text
//! WorkerHandle ──► event queue ──► ServiceWorker (one task per event)
//!                                     │
//!                                     ├── Router ──► Strategies ──► CacheStorage
//!                                     │                 └── OfflineResponder
//!                                     ├── LifecycleController
//!                                     └── Clients / Notifications
//!
//! CacheStorage
//!     ├── devflow-static-v1   (Request → Response)
//!     ├── devflow-dynamic-v1
//!     └── devflow-api-v1      (stamped with sw-cache-date)
//! ```

use devflow_net::NetError;
use thiserror::Error;

pub mod annotate;
pub mod cache;
pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod message;
pub mod offline;
pub mod route;
pub mod strategy;
pub mod sync;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, SharedCacheStorage};
pub use clients::{
    Client, ClientMessage, ClientType, Clients, Notification, NotificationAction, NotificationData,
    Notifications, SharedClients, SharedNotifications,
};
pub use config::{ExpiredEntryPolicy, WorkerConfig};
pub use lifecycle::{LifecycleController, WorkerState};
pub use message::{InboundMessage, Reply};
pub use offline::OfflineResponder;
pub use route::{RequestClass, Route, Router};
pub use strategy::Strategies;
pub use sync::{BackgroundEvents, ClickOutcome};
pub use worker::{FetchOutcome, ServiceWorker, WorkerEvent, WorkerHandle};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    /// The fetch rejected or timed out.
    #[error("Network failure: {0}")]
    NetworkFailure(#[from] NetError),

    /// No entry for the cache key.
    #[error("Cache miss: {0}")]
    CacheMiss(String),

    /// Entry present but past the freshness window. `age_ms` is `None`
    /// when the entry carries no capture time.
    #[error("Stale entry: {key} (age {age_ms:?} ms)")]
    StaleEntry { key: String, age_ms: Option<i64> },

    /// A required static asset could not be fetched during install.
    #[error("Install failed on {url}: {reason}")]
    InstallAssetFailure { url: String, reason: String },

    /// A runtime message could not be understood.
    #[error("Malformed message: {0}")]
    MessageHandlingFailure(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
