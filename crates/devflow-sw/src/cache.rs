//! Cache partition store.
//!
//! `CacheStorage` holds named `Cache` partitions; each partition maps a
//! cache key (`"{METHOD} {url}"`) to a snapshot of a response. Partitions
//! are created on first open and live until deleted. Both levels remember
//! insertion order so enumeration is stable.
//!
//! There is no size index: [`CacheStorage::total_body_bytes`] walks every
//! stored body.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use devflow_net::{Request, Response};
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::Result;

/// Cache storage shared between concurrently running event handlers.
pub type SharedCacheStorage = Arc<RwLock<CacheStorage>>;

// ==================== Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, duplicates kept. Values are raw bytes;
    /// they need not be visible ASCII.
    pub headers: Vec<(String, Bytes)>,

    /// Response body.
    pub body: Bytes,
}

impl CacheEntry {
    /// Snapshot `response` as the answer to `request`.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Bytes::copy_from_slice(value.as_bytes()),
                )
            })
            .collect();

        Self {
            url: request.url.clone(),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body().clone(),
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.append(n, v);
                }
                _ => debug!(header = %name, "Dropping unrepresentable cached header"),
            }
        }
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        Response::new(self.url.clone(), status, headers, self.body.clone())
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

// ==================== Cache ====================

/// A named cache partition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries by key.
    entries: HashMap<String, CacheEntry>,

    /// Keys in insertion order.
    order: Vec<String>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &Request) -> Option<Response> {
        self.get(&request.cache_key()).map(CacheEntry::to_response)
    }

    /// Look up an entry by cache key.
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store `response` as the answer to `request`. Last write wins.
    pub fn put(&mut self, request: &Request, response: &Response) {
        self.put_entry(request.cache_key(), CacheEntry::from_response(request, response));
    }

    /// Store an entry under an explicit key.
    pub fn put_entry(&mut self, key: String, entry: CacheEntry) {
        if self.entries.insert(key.clone(), entry).is_none() {
            self.order.push(key);
        }
    }

    /// Delete the entry for a request.
    pub fn delete(&mut self, request: &Request) -> bool {
        self.delete_key(&request.cache_key())
    }

    /// Delete an entry by cache key.
    pub fn delete_key(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Get all keys in insertion order.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of stored body sizes. Walks every entry.
    pub fn body_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.body_len() as u64).sum()
    }
}

// ==================== Cache Storage ====================

/// All cache partitions.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in the shared handle used by the worker.
    pub fn shared(self) -> SharedCacheStorage {
        Arc::new(RwLock::new(self))
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            debug!(cache = name, "Creating cache partition");
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        if self.caches.remove(name).is_some() {
            self.order.retain(|n| n != name);
            true
        } else {
            false
        }
    }

    /// Get all cache names in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Match a request in one named partition.
    pub fn match_in(&self, name: &str, request: &Request) -> Option<Response> {
        self.get(name)?.match_request(request)
    }

    /// Delete every partition for which `keep` returns false.
    /// Returns the deleted names.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let doomed: Vec<String> = self
            .order
            .iter()
            .filter(|name| !keep(name.as_str()))
            .cloned()
            .collect();

        for name in &doomed {
            info!(cache = %name, "Deleting old cache");
            self.delete(name);
        }
        doomed
    }

    /// Total stored body bytes across every partition. Walks every entry.
    pub fn total_body_bytes(&self) -> u64 {
        self.caches.values().map(Cache::body_bytes).sum()
    }

    /// Write all partitions to a JSON snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(self)?;
        std::fs::write(path, contents)?;
        debug!(path = %path.display(), caches = self.caches.len(), "Saved cache snapshot");
        Ok(())
    }

    /// Read a snapshot written by [`CacheStorage::save`]. A missing file
    /// yields empty storage.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let contents = std::fs::read_to_string(path)?;
        let storage: Self = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), caches = storage.caches.len(), "Loaded cache snapshot");
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> Request {
        Request::parse_get(url).unwrap()
    }

    fn response(url: &str, body: &'static str) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        Response::new(
            Url::parse(url).unwrap(),
            StatusCode::OK,
            headers,
            Bytes::from_static(body.as_bytes()),
        )
    }

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("devflow-static-v1");
        let url = "https://example.com/style.css";
        cache.put(&request(url), &response(url, "body{}"));

        let hit = cache.match_request(&request(url)).unwrap();
        assert_eq!(hit.body().as_ref(), b"body{}");
        assert_eq!(hit.header_str("content-type"), Some("text/plain"));
        assert!(cache.match_request(&request("https://example.com/other.css")).is_none());
    }

    #[test]
    fn test_non_ascii_header_values_survive_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches.json");
        let url = "https://example.com/report.pdf";

        let mut headers = HeaderMap::new();
        let disposition = HeaderValue::from_bytes(b"attachment; filename=\"r\xe9sum\xe9.pdf\"").unwrap();
        headers.insert("content-disposition", disposition.clone());
        headers.append("x-tag", HeaderValue::from_static("a"));
        headers.append("x-tag", HeaderValue::from_static("b"));
        let live = Response::new(Url::parse(url).unwrap(), StatusCode::OK, headers, Bytes::new());

        let mut storage = CacheStorage::new();
        storage.open("v1").put(&request(url), &live);
        storage.save(&path).unwrap();

        let hit = CacheStorage::load(&path)
            .unwrap()
            .match_in("v1", &request(url))
            .unwrap();
        assert_eq!(hit.headers.get("content-disposition"), Some(&disposition));
        let tags: Vec<_> = hit.headers.get_all("x-tag").iter().collect();
        assert_eq!(tags, vec!["a", "b"]);
    }

    #[test]
    fn test_cache_keys_keep_insertion_order() {
        let mut cache = Cache::new("test");
        for name in ["b", "a", "c"] {
            let url = format!("https://example.com/{name}.js");
            cache.put(&request(&url), &response(&url, "x"));
        }
        // Overwrite does not move the key.
        let url = "https://example.com/b.js";
        cache.put(&request(url), &response(url, "yy"));

        assert_eq!(
            cache.keys(),
            vec![
                "GET https://example.com/b.js",
                "GET https://example.com/a.js",
                "GET https://example.com/c.js",
            ]
        );
        assert_eq!(cache.body_bytes(), 4);
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1");
        let url = "https://example.com/style.css";
        cache.put(&request(url), &response(url, "x"));

        assert!(cache.delete(&request(url)));
        assert!(!cache.delete(&request(url)));
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_cache_storage_open_and_delete() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1");
        assert!(storage.has("v1"));

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
        assert!(storage.keys().is_empty());
    }

    #[test]
    fn test_retain_deletes_unlisted_partitions() {
        let mut storage = CacheStorage::new();
        for name in ["devflow-static-v0", "devflow-static-v1", "other", "devflow-api-v1"] {
            storage.open(name);
        }

        let deleted = storage.retain(|name| name.ends_with("-v1"));

        assert_eq!(deleted, vec!["devflow-static-v0", "other"]);
        assert_eq!(storage.keys(), vec!["devflow-static-v1", "devflow-api-v1"]);
    }

    #[test]
    fn test_total_body_bytes_spans_partitions() {
        let mut storage = CacheStorage::new();
        let a = "https://example.com/a";
        let b = "https://example.com/b";
        storage.open("one").put(&request(a), &response(a, "12345"));
        storage.open("two").put(&request(b), &response(b, "123"));

        assert_eq!(storage.total_body_bytes(), 8);
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("caches.json");

        let mut storage = CacheStorage::new();
        let url = "https://example.com/index.html";
        storage.open("devflow-static-v1").put(&request(url), &response(url, "<html>"));
        storage.save(&path).unwrap();

        let loaded = CacheStorage::load(&path).unwrap();
        let hit = loaded
            .match_in("devflow-static-v1", &request(url))
            .unwrap();
        assert_eq!(hit.text().unwrap(), "<html>");
    }

    #[test]
    fn test_load_missing_snapshot_is_empty() {
        let storage = CacheStorage::load(Path::new("/nonexistent/devflow/caches.json")).unwrap();
        assert!(storage.keys().is_empty());
    }
}
