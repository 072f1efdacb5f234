//! In-memory [`Fetcher`] serving canned responses.
//!
//! Used to simulate a network outage and to drive caching code without
//! sockets. Unknown URLs fail the way an unreachable host does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::Notify;
use tracing::trace;

use crate::{Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum Scripted {
    Respond {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Fail(String),
}

/// A fetcher whose answers are set up ahead of time.
#[derive(Debug)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<String>>,
    online: AtomicBool,
    fetched: Notify,
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
            fetched: Notify::new(),
        }
    }

    /// A fetcher for which every request fails.
    pub fn offline() -> Self {
        let fetcher = Self::new();
        fetcher.set_online(false);
        fetcher
    }

    /// Answer `url` with `status` and `body`.
    pub fn respond(&self, url: &str, status: u16, body: impl Into<Bytes>) -> &Self {
        self.respond_with_headers(url, status, &[], body)
    }

    /// Answer `url` with `status`, `headers` and `body`.
    pub fn respond_with_headers(
        &self,
        url: &str,
        status: u16,
        headers: &[(&'static str, &'static str)],
        body: impl Into<Bytes>,
    ) -> &Self {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        let scripted = Scripted::Respond {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: map,
            body: body.into(),
        };
        self.insert(url, scripted);
        self
    }

    /// Make `url` fail with a transport error.
    pub fn fail(&self, url: &str) -> &Self {
        self.insert(url, Scripted::Fail(format!("connection reset: {url}")));
        self
    }

    /// Toggle the whole network. While offline every request fails.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Total number of fetches attempted.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Number of fetches attempted for `url`.
    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|u| u.as_str() == url).count())
            .unwrap_or(0)
    }

    /// Wait until at least `count` fetches were attempted, or `timeout`
    /// elapses. Returns whether the count was reached.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.fetched.notified();
                if self.call_count() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    fn insert(&self, url: &str, scripted: Scripted) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.to_string(), scripted);
        }
    }

    fn lookup(&self, url: &str) -> Option<Scripted> {
        self.routes.lock().ok()?.get(url).cloned()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let url = request.url.to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.clone());
        }
        self.fetched.notify_waiters();

        if !self.online.load(Ordering::SeqCst) {
            trace!(url = %url, "Scripted network is offline");
            return Err(NetError::RequestFailed(format!("network unreachable: {url}")));
        }

        match self.lookup(&url) {
            Some(Scripted::Respond {
                status,
                headers,
                body,
            }) => Ok(Response::new(request.url, status, headers, body)),
            Some(Scripted::Fail(reason)) => Err(NetError::RequestFailed(reason)),
            None => Err(NetError::RequestFailed(format!("host not found: {url}"))),
        }
    }
}
