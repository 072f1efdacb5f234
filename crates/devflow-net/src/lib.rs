//! # DevFlow Net
//!
//! Request and response values plus the network seam for the DevFlow
//! offline worker.
//!
//! ## Design Goals
//!
//! 1. **Value responses**: a `Response` owns its body as `Bytes`, so a copy
//!    can be stored in a cache while the original is still handed to the
//!    caller with an unread body
//! 2. **Copy-on-write headers**: rewriting headers yields a new response and
//!    never touches the one it came from
//! 3. **One seam**: everything that talks to the network goes through the
//!    [`Fetcher`] trait, so strategies can be exercised without sockets

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;
use url::Url;

pub mod loader;
pub mod scripted;

pub use loader::{HttpFetcher, LoaderConfig};
pub use scripted::ScriptedFetcher;

/// Errors that can occur in networking.
///
/// HTTP error statuses are not errors; a 404 is a `Response` whose
/// [`Response::ok`] is false.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid body: {0}")]
    InvalidBody(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST, url)
        }
    }

    /// Parse `url` and create a GET request.
    pub fn parse_get(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Key under which the response to this request is cached.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// HTTP response.
///
/// Cloning is cheap: the body is reference counted.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers,
            body: body.into(),
        }
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Canonical reason phrase for the status, if any.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::InvalidBody(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::InvalidBody(e.to_string()))
    }

    /// Get a header value as a string, if present and valid ASCII.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parsed `Content-Type`.
    pub fn content_type(&self) -> Option<Mime> {
        self.header_str("content-type")
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Return a new response with `name` set to `value`.
    ///
    /// The receiver is left untouched; status and body are shared.
    pub fn with_header(&self, name: HeaderName, value: HeaderValue) -> Self {
        let mut headers = self.headers.clone();
        headers.insert(name, value);
        Self {
            url: self.url.clone(),
            status: self.status,
            headers,
            body: self.body.clone(),
        }
    }
}

/// Something that can perform a network fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. Errors mean the network could not produce any
    /// response at all.
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_request_builder() {
        let request = Request::get(url("https://example.com"))
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_cache_key_includes_method() {
        let get = Request::get(url("https://example.com/a"));
        let post = Request::post(url("https://example.com/a"), Bytes::from_static(b"x"));

        assert_eq!(get.cache_key(), "GET https://example.com/a");
        assert_ne!(get.cache_key(), post.cache_key());
    }

    #[test]
    fn test_parse_get_rejects_garbage() {
        assert!(matches!(
            Request::parse_get("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_with_header_leaves_original_untouched() {
        let original = Response::new(
            url("https://example.com/data.json"),
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"{\"a\":1}"),
        );

        let marked = original.with_header(
            HeaderName::from_static("x-marker"),
            HeaderValue::from_static("1"),
        );

        assert!(original.header_str("x-marker").is_none());
        assert_eq!(marked.header_str("x-marker"), Some("1"));
        assert_eq!(marked.body(), original.body());
        assert_eq!(marked.status, original.status);
    }

    #[test]
    fn test_response_json_and_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let response = Response::new(
            url("https://api.github.com/user"),
            StatusCode::OK,
            headers,
            Bytes::from_static(b"{\"login\":\"octocat\"}"),
        );

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["login"], "octocat");
        assert_eq!(response.content_type(), Some(mime::APPLICATION_JSON));
        assert_eq!(response.status_text(), "OK");
    }
}
