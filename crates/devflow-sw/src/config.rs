//! Worker configuration.
//!
//! One immutable `WorkerConfig` is built at startup and shared (behind an
//! `Arc`) by the router, the strategies and the lifecycle controller. Cache
//! partition names are derived from `app_name` and `cache_version`; bumping
//! the version is how every old partition gets dropped on the next
//! activation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Header stamped on cached API responses with the capture time (epoch ms).
pub const CACHE_DATE_HEADER: &str = "sw-cache-date";

/// Header added to API responses served from cache while offline.
pub const OFFLINE_CACHE_HEADER: &str = "sw-offline-cache";

/// Longest accepted API freshness window: one week.
pub const MAX_API_FRESHNESS_MINUTES: u64 = 7 * 24 * 60;

/// What to do with an API entry found past its freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiredEntryPolicy {
    /// Leave it in place; it is judged expired again on every read.
    #[default]
    Retain,
    /// Delete it from the API partition on the read that found it expired.
    Evict,
}

/// Defaults used when a push payload omits a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub url: String,
    pub vibrate: Vec<u32>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "DevFlow Notification".to_string(),
            body: "New activity in your DevFlow dashboard".to_string(),
            icon: "/assets/images/icon-192x192.png".to_string(),
            badge: "/assets/images/favicon.svg".to_string(),
            tag: "devflow-notification".to_string(),
            url: "/".to_string(),
            vibrate: vec![200, 100, 200, 100, 200],
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix of every partition name.
    pub app_name: String,

    /// Version suffix of every partition name.
    pub cache_version: String,

    /// Origin of the controlled pages. Same-origin requests are cache-first.
    pub origin: Url,

    /// Host whose responses use network-first with expiry.
    pub api_host: String,

    /// Host whose responses use cache-first.
    pub cdn_host: String,

    /// Assets fetched into the static partition at install. Relative
    /// entries are resolved against `origin`.
    pub static_assets: Vec<String>,

    /// Freshness window for cached API responses, in minutes.
    pub api_freshness_minutes: u64,

    /// Handling of API entries read past the freshness window.
    pub expired_api_policy: ExpiredEntryPolicy,

    /// Background sync tag that triggers a data refresh notice.
    pub sync_tag: String,

    /// Push notification defaults.
    pub notifications: NotificationDefaults,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            app_name: "devflow".to_string(),
            cache_version: "v1".to_string(),
            origin: Url::parse("http://localhost:8080/").expect("static origin URL is valid"),
            api_host: "api.github.com".to_string(),
            cdn_host: "cdn.jsdelivr.net".to_string(),
            static_assets: [
                "/",
                "/index.html",
                "/manifest.json",
                "/assets/css/main.css",
                "/assets/js/real-data.js",
                "/assets/js/database.js",
                "/assets/js/auth.js",
                "/assets/js/app.js",
                "/assets/images/favicon.svg",
                "https://cdn.jsdelivr.net/npm/chart.js@4.4.0/dist/chart.umd.js",
                "https://cdn.jsdelivr.net/npm/d3@7.8.5/dist/d3.min.js",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            api_freshness_minutes: 15,
            expired_api_policy: ExpiredEntryPolicy::Retain,
            sync_tag: "github-data-sync".to_string(),
            notifications: NotificationDefaults::default(),
        }
    }
}

impl WorkerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the page origin.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = origin;
        self
    }

    /// Replace the static asset list.
    pub fn with_static_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_assets = assets.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(ServiceWorkerError::Config("app_name is empty".to_string()));
        }
        if self.cache_version.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache_version is empty".to_string(),
            ));
        }
        if self.api_freshness_minutes > MAX_API_FRESHNESS_MINUTES {
            return Err(ServiceWorkerError::Config(format!(
                "api_freshness_minutes {} exceeds {}",
                self.api_freshness_minutes, MAX_API_FRESHNESS_MINUTES
            )));
        }
        if self.origin.cannot_be_a_base() {
            return Err(ServiceWorkerError::Config(format!(
                "origin {} cannot resolve relative assets",
                self.origin
            )));
        }
        Ok(())
    }

    pub fn static_cache_name(&self) -> String {
        format!("{}-static-{}", self.app_name, self.cache_version)
    }

    pub fn dynamic_cache_name(&self) -> String {
        format!("{}-dynamic-{}", self.app_name, self.cache_version)
    }

    pub fn api_cache_name(&self) -> String {
        format!("{}-api-{}", self.app_name, self.cache_version)
    }

    /// The partitions that survive activation.
    pub fn current_cache_names(&self) -> [String; 3] {
        [
            self.static_cache_name(),
            self.dynamic_cache_name(),
            self.api_cache_name(),
        ]
    }

    pub fn is_current_cache(&self, name: &str) -> bool {
        self.current_cache_names().iter().any(|n| n == name)
    }

    pub fn api_freshness(&self) -> Duration {
        Duration::from_secs(self.api_freshness_minutes.saturating_mul(60))
    }

    /// Static assets as absolute URLs.
    pub fn static_asset_urls(&self) -> Result<Vec<Url>> {
        self.static_assets
            .iter()
            .map(|asset| {
                self.origin.join(asset).map_err(|e| {
                    ServiceWorkerError::Config(format!("invalid static asset {asset}: {e}"))
                })
            })
            .collect()
    }
}
