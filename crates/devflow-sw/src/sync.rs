//! Background sync, push and notification clicks.
//!
//! Everything here is best-effort: failures are logged and dropped, never
//! returned to the dispatcher.

use std::sync::Arc;

use devflow_common::Clock;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{
    ClientMessage, ClientType, Notification, NotificationAction, NotificationData,
    SharedClients, SharedNotifications,
};
use crate::config::WorkerConfig;

const SYNC_TYPE: &str = "github-data";
const DISMISS_ACTION: &str = "dismiss";

/// Fields a push payload may carry. Anything missing takes the configured
/// default.
#[derive(Debug, Default)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    image: Option<String>,
    url: Option<String>,
    tag: Option<String>,
}

impl PushPayload {
    /// Pick the known string fields out of a decoded payload. A field of
    /// another type counts as missing; a payload that is not an object
    /// carries no fields at all.
    fn from_value(value: &Value) -> Self {
        let field = |name: &str| {
            let found = value.get(name)?;
            match found.as_str() {
                Some(text) => Some(text.to_string()),
                None => {
                    debug!(field = name, value = %found, "Ignoring push field of unexpected type");
                    None
                }
            }
        };

        Self {
            title: field("title"),
            body: field("body"),
            image: field("image"),
            url: field("url"),
            tag: field("tag"),
        }
    }
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// The dismiss action; nothing beyond closing.
    Dismissed,
    /// An open window was focused and told about the click.
    Focused(String),
    /// No window was open; a new one was opened.
    Opened(String),
}

/// Handles sync, push and notification-click events.
pub struct BackgroundEvents {
    config: Arc<WorkerConfig>,
    clients: SharedClients,
    notifications: SharedNotifications,
    clock: Arc<dyn Clock>,
}

impl BackgroundEvents {
    pub fn new(
        config: Arc<WorkerConfig>,
        clients: SharedClients,
        notifications: SharedNotifications,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            clients,
            notifications,
            clock,
        }
    }

    // ==================== Sync ====================

    /// Tell the first controlled page that a data refresh started. Returns
    /// whether a page was notified.
    pub async fn handle_sync(&self, tag: &str) -> bool {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring unknown sync tag");
            return false;
        }
        info!(tag, "Background sync");

        let clients = self.clients.read().await;
        let Some(client) = clients.match_all(false).into_iter().next() else {
            debug!("Background sync with no open pages");
            return false;
        };
        let message = ClientMessage::BackgroundSyncStart {
            sync_type: SYNC_TYPE.to_string(),
        };
        match client.post_message(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(client = %client.id, error = %e, "Background sync notice not delivered");
                false
            }
        }
    }

    // ==================== Push ====================

    /// Show a notification built from a JSON push payload. A push without a
    /// payload, or with one that is not JSON, shows nothing.
    pub async fn handle_push(&self, payload: Option<&[u8]>) -> Option<Notification> {
        let Some(raw) = payload else {
            debug!("Push without payload");
            return None;
        };
        let parsed = match serde_json::from_slice::<Value>(raw) {
            Ok(value) => PushPayload::from_value(&value),
            Err(e) => {
                warn!(error = %e, "Malformed push payload");
                return None;
            }
        };

        let notification = self.build_notification(parsed);
        self.notifications.write().await.show(notification.clone());
        Some(notification)
    }

    fn build_notification(&self, payload: PushPayload) -> Notification {
        let defaults = &self.config.notifications;
        let action = |action: &str, title: &str| NotificationAction {
            action: action.to_string(),
            title: title.to_string(),
            icon: defaults.icon.clone(),
        };

        Notification {
            title: payload.title.unwrap_or_else(|| defaults.title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            image: payload.image,
            vibrate: defaults.vibrate.clone(),
            data: NotificationData {
                url: payload.url.unwrap_or_else(|| defaults.url.clone()),
                timestamp: self.clock.now_millis(),
            },
            actions: vec![
                action("view", "View Details"),
                action(DISMISS_ACTION, "Dismiss"),
            ],
            tag: payload.tag.unwrap_or_else(|| defaults.tag.clone()),
            renotify: true,
            require_interaction: true,
        }
    }

    // ==================== Notification Click ====================

    /// Close the notification, then focus a window on the page origin and
    /// forward the target URL, or open a new window when none is open.
    pub async fn handle_notification_click(&self, tag: &str, action: &str) -> Option<ClickOutcome> {
        let closed = self.notifications.write().await.close(tag);
        if action == DISMISS_ACTION {
            return Some(ClickOutcome::Dismissed);
        }

        let target = closed
            .map(|n| n.data.url)
            .unwrap_or_else(|| self.config.notifications.url.clone());
        let origin = self.config.origin.origin();

        let mut clients = self.clients.write().await;
        let existing = clients
            .match_all(true)
            .into_iter()
            .find(|c| c.client_type == ClientType::Window && c.url.origin() == origin)
            .map(|c| c.id.clone());

        if let Some(id) = existing {
            if let Err(e) = clients.focus(&id) {
                warn!(client = %id, error = %e, "Could not focus client");
            }
            let message = ClientMessage::NotificationClicked {
                url: target,
                action: action.to_string(),
            };
            if let Err(e) = clients.post_message(&id, message) {
                warn!(client = %id, error = %e, "Notification click not delivered");
            }
            return Some(ClickOutcome::Focused(id));
        }

        let url: Url = match self.config.origin.join(&target) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %target, error = %e, "Cannot open window for notification");
                return None;
            }
        };
        let opened = clients.open_window(url);
        Some(ClickOutcome::Opened(opened.id.clone()))
    }
}
