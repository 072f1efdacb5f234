//! Strategy selection for intercepted requests.

use std::fmt;

use devflow_net::Request;
use http::Method;
use tracing::trace;
use url::{Origin, Url};

use crate::config::WorkerConfig;

/// Where a request is going, relative to the controlled pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Same scheme, host and port as the pages.
    SameOrigin,
    /// The GitHub API host.
    GithubApi,
    /// The CDN host serving third-party libraries.
    Cdn,
    /// Anything else.
    External,
}

impl RequestClass {
    /// The caching strategy for this class.
    pub fn route(self) -> Route {
        match self {
            RequestClass::SameOrigin | RequestClass::Cdn => Route::CacheFirst,
            RequestClass::GithubApi => Route::NetworkFirstWithExpiry,
            RequestClass::External => Route::NetworkFirst,
        }
    }
}

/// What the worker does with an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Not intercepted; the request goes to the network untouched.
    Passthrough,
    /// Static partition first, network on miss, revalidate on hit.
    CacheFirst,
    /// Network first, API partition with a freshness window on failure.
    NetworkFirstWithExpiry,
    /// Network first, dynamic partition on failure.
    NetworkFirst,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Route::Passthrough => "passthrough",
            Route::CacheFirst => "cache-first",
            Route::NetworkFirstWithExpiry => "network-first-with-expiry",
            Route::NetworkFirst => "network-first",
        };
        f.pad(name)
    }
}

/// Maps requests to routes. Pure: the same request always routes the same.
#[derive(Debug, Clone)]
pub struct Router {
    origin: Origin,
    api_host: String,
    cdn_host: String,
}

impl Router {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            origin: config.origin.origin(),
            api_host: config.api_host.to_ascii_lowercase(),
            cdn_host: config.cdn_host.to_ascii_lowercase(),
        }
    }

    /// Classify a URL. Same-origin wins over host matches.
    pub fn classify(&self, url: &Url) -> RequestClass {
        if url.origin() == self.origin {
            return RequestClass::SameOrigin;
        }
        match url.host_str() {
            Some(host) if host == self.api_host => RequestClass::GithubApi,
            Some(host) if host == self.cdn_host => RequestClass::Cdn,
            _ => RequestClass::External,
        }
    }

    /// Pick the route for a request. Only GET is ever intercepted.
    pub fn select(&self, request: &Request) -> Route {
        if request.method != Method::GET {
            trace!(url = %request.url, method = %request.method, "Not intercepting non-GET request");
            return Route::Passthrough;
        }
        let route = self.classify(&request.url).route();
        trace!(url = %request.url, %route, "Route selected");
        route
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn router() -> Router {
        let config = WorkerConfig::default()
            .with_origin(Url::parse("https://devflow.example/").unwrap());
        Router::new(&config)
    }

    fn get(url: &str) -> Request {
        Request::parse_get(url).unwrap()
    }

    #[test]
    fn test_same_origin_is_cache_first() {
        let router = router();
        assert_eq!(
            router.select(&get("https://devflow.example/assets/js/app.js")),
            Route::CacheFirst
        );
        assert_eq!(
            router.classify(&Url::parse("https://devflow.example/").unwrap()),
            RequestClass::SameOrigin
        );
    }

    #[test]
    fn test_other_port_is_not_same_origin() {
        let router = router();
        assert_eq!(
            router.classify(&Url::parse("https://devflow.example:8443/").unwrap()),
            RequestClass::External
        );
    }

    #[test]
    fn test_github_api_is_network_first_with_expiry() {
        assert_eq!(
            router().select(&get("https://api.github.com/user")),
            Route::NetworkFirstWithExpiry
        );
    }

    #[test]
    fn test_cdn_is_cache_first() {
        assert_eq!(
            router().select(&get("https://cdn.jsdelivr.net/npm/d3@7.8.5/dist/d3.min.js")),
            Route::CacheFirst
        );
    }

    #[test]
    fn test_everything_else_is_network_first() {
        let router = router();
        assert_eq!(
            router.select(&get("https://fonts.googleapis.com/css2?family=Inter")),
            Route::NetworkFirst
        );
        // Subdomains of the API host are not the API host.
        assert_eq!(
            router.select(&get("https://uploads.api.github.com/x")),
            Route::NetworkFirst
        );
    }

    #[test]
    fn test_non_get_passes_through() {
        let post = Request::post(
            Url::parse("https://api.github.com/graphql").unwrap(),
            Bytes::from_static(b"{}"),
        );
        assert_eq!(router().select(&post), Route::Passthrough);

        let head = Request::new(Method::HEAD, Url::parse("https://devflow.example/").unwrap());
        assert_eq!(router().select(&head), Route::Passthrough);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let router = router();
        let request = get("https://api.github.com/repos/rust-lang/rust");
        let first = router.select(&request);
        for _ in 0..10 {
            assert_eq!(router.select(&request), first);
        }
    }
}
