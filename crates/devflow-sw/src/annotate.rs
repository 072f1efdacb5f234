//! Response annotation.
//!
//! API responses are stored with a capture timestamp header and, when served
//! from cache during an outage, handed back with an offline marker header.
//! Every function here returns a new `Response`; the input is never mutated.

use std::time::Duration;

use devflow_net::Response;
use http::{HeaderName, HeaderValue};

use crate::config::{CACHE_DATE_HEADER, OFFLINE_CACHE_HEADER};

/// How a cached API response relates to the freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within the window.
    Fresh { age_ms: i64 },
    /// At or past the window.
    Expired { age_ms: i64 },
    /// No capture header; stored before stamping existed.
    Unstamped,
}

/// Copy of `response` stamped with the capture time.
pub fn stamp_capture_time(response: &Response, now_ms: i64) -> Response {
    response.with_header(
        HeaderName::from_static(CACHE_DATE_HEADER),
        HeaderValue::from(now_ms),
    )
}

/// Copy of `response` marked as served from the offline cache.
pub fn mark_offline(response: &Response) -> Response {
    response.with_header(
        HeaderName::from_static(OFFLINE_CACHE_HEADER),
        HeaderValue::from_static("true"),
    )
}

/// Capture time recorded by [`stamp_capture_time`], if any.
pub fn capture_time(response: &Response) -> Option<i64> {
    response
        .header_str(CACHE_DATE_HEADER)
        .and_then(|v| v.trim().parse::<i64>().ok())
}

/// Judge a cached response against `window` at `now_ms`.
///
/// A capture time in the future (clock skew) counts as age zero. Ages
/// saturate, so a corrupt capture time far in the past is simply expired.
pub fn freshness(response: &Response, now_ms: i64, window: Duration) -> Freshness {
    match capture_time(response) {
        None => Freshness::Unstamped,
        Some(captured) => {
            let age_ms = now_ms.saturating_sub(captured).max(0);
            let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
            if age_ms < window_ms {
                Freshness::Fresh { age_ms }
            } else {
                Freshness::Expired { age_ms }
            }
        }
    }
}
