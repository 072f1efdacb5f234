//! Synthetic responses for requests neither network nor cache can answer.

use bytes::Bytes;
use devflow_net::Response;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::config::WorkerConfig;

const OFFLINE_TEXT: &str = "This content is not available offline.";

const OFFLINE_API_MESSAGE: &str =
    "You are currently offline. Please check your internet connection.";

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>DevFlow - Offline</title>
  <style>
    body {
      font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif;
      background: #1a202c;
      color: #f7f3e9;
      display: flex;
      align-items: center;
      justify-content: center;
      min-height: 100vh;
      margin: 0;
      text-align: center;
    }
    main { max-width: 480px; padding: 2.5rem; border-radius: 16px; background: #2d3748; }
    h1 { font-size: 2rem; margin: 0 0 1rem; color: #64ffda; }
    p { line-height: 1.6; color: #c0c5ce; }
    button {
      margin-top: 1.5rem;
      padding: 0.8rem 1.8rem;
      border: none;
      border-radius: 10px;
      font-weight: 700;
      background: #00ddff;
      color: #1a202c;
      cursor: pointer;
    }
    ul { text-align: left; color: #c0c5ce; }
  </style>
</head>
<body>
  <main>
    <h1>You're Offline</h1>
    <p>DevFlow needs a connection to load fresh GitHub data. Check your network and try again.</p>
    <button type="button" onclick="window.location.reload()">Try Again</button>
    <ul>
      <li>Cached repository data stays browsable</li>
      <li>Your contribution history is still on this device</li>
      <li>Saved bookmarks remain available</li>
    </ul>
  </main>
</body>
</html>
"#;

#[derive(Debug, Serialize)]
struct OfflineApiBody<'a> {
    message: &'a str,
    offline: bool,
    cached_data_available: bool,
}

/// Builds the terminal response for a request that could not be served.
///
/// Total: every URL gets a response, 200 for HTML documents and 503 for
/// everything else.
#[derive(Debug, Clone)]
pub struct OfflineResponder {
    origin: Url,
    api_host: String,
}

impl OfflineResponder {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            origin: config.origin.clone(),
            api_host: config.api_host.to_ascii_lowercase(),
        }
    }

    /// Response for a failed request to `url`.
    pub fn respond(&self, url: &Url) -> Response {
        let path = url.path();
        let response = if path == "/" || path.ends_with(".html") {
            Self::html_page(url)
        } else if url.host_str() == Some(self.api_host.as_str()) {
            Self::api_error(url)
        } else {
            Self::plain_error(url)
        };
        debug!(url = %url, status = %response.status, "Serving offline response");
        response
    }

    /// Like [`respond`](Self::respond) for a raw URL string. Relative
    /// strings resolve against the page origin; anything unparseable gets
    /// the plain-text 503.
    pub fn respond_to_str(&self, raw: &str) -> Response {
        match self.origin.join(raw) {
            Ok(url) => self.respond(&url),
            Err(_) => Self::plain_error(&self.origin),
        }
    }

    fn html_page(url: &Url) -> Response {
        Self::build(
            url,
            StatusCode::OK,
            "text/html; charset=utf-8",
            Bytes::from_static(OFFLINE_PAGE.as_bytes()),
        )
    }

    fn api_error(url: &Url) -> Response {
        let body = OfflineApiBody {
            message: OFFLINE_API_MESSAGE,
            offline: true,
            cached_data_available: false,
        };
        // Serializing a struct of strs and bools cannot fail.
        let json = serde_json::to_vec(&body).unwrap_or_default();
        Self::build(
            url,
            StatusCode::SERVICE_UNAVAILABLE,
            "application/json",
            Bytes::from(json),
        )
    }

    fn plain_error(url: &Url) -> Response {
        Self::build(
            url,
            StatusCode::SERVICE_UNAVAILABLE,
            "text/plain; charset=utf-8",
            Bytes::from_static(OFFLINE_TEXT.as_bytes()),
        )
    }

    fn build(url: &Url, status: StatusCode, content_type: &'static str, body: Bytes) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Response::new(url.clone(), status, headers, body)
    }
}
