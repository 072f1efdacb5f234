//! Runtime messages from pages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, ServiceWorkerError};

/// A message a page posts to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    /// Activate now instead of waiting. No reply.
    SkipWaiting,
    /// Reply with the total stored body size.
    GetCacheSize,
    /// Drop old-version partitions and reply with success.
    ClearCache,
}

impl InboundMessage {
    /// Interpret an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let shown = value.to_string();
        serde_json::from_value(value)
            .map_err(|e| ServiceWorkerError::MessageHandlingFailure(format!("{e}: {shown}")))
    }

    /// Whether the sender gets a reply once the message is handled.
    pub fn expects_reply(self) -> bool {
        !matches!(self, InboundMessage::SkipWaiting)
    }
}

/// Reply sent back over a message's reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    CacheSize {
        #[serde(rename = "cacheSize")]
        cache_size: u64,
    },
    Success {
        success: bool,
    },
}

impl Reply {
    pub fn success() -> Self {
        Reply::Success { success: true }
    }
}
