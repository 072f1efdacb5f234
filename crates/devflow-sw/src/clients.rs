//! Controlled pages and shown notifications.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Clients registry shared between event handlers.
pub type SharedClients = Arc<RwLock<Clients>>;

/// Notification registry shared between event handlers.
pub type SharedNotifications = Arc<RwLock<Notifications>>;

// ==================== Outbound Messages ====================

/// Messages the worker posts to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// A background data refresh started.
    BackgroundSyncStart {
        #[serde(rename = "syncType")]
        sync_type: String,
    },
    /// The user clicked a notification.
    NotificationClicked { url: String, action: String },
}

// ==================== Client ====================

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// A page the worker can talk to.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether this worker controls the page.
    pub controlled: bool,

    /// Outbound channel; `None` for windows the worker opened itself.
    sender: Option<mpsc::UnboundedSender<ClientMessage>>,
}

impl Client {
    /// Post a message to this client.
    pub fn post_message(&self, message: ClientMessage) -> Result<()> {
        let sender = self.sender.as_ref().ok_or_else(|| {
            ServiceWorkerError::InvalidState(format!("client {} has no message port", self.id))
        })?;
        sender.send(message).map_err(|_| {
            ServiceWorkerError::InvalidState(format!("client {} is gone", self.id))
        })
    }
}

// ==================== Clients ====================

/// Clients registry, in connection order.
#[derive(Debug, Default)]
pub struct Clients {
    clients: Vec<Client>,
    next_id: u64,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedClients {
        Arc::new(RwLock::new(self))
    }

    /// Register a page. The receiver gets everything the worker posts to it.
    pub fn connect(
        &mut self,
        url: Url,
        client_type: ClientType,
    ) -> (String, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.allocate_id();
        debug!(client = %id, url = %url, "Client connected");
        self.clients.push(Client {
            id: id.clone(),
            url,
            client_type,
            focused: false,
            controlled: false,
            sender: Some(tx),
        });
        (id, rx)
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    /// All clients, optionally including pages not yet controlled.
    pub fn match_all(&self, include_uncontrolled: bool) -> Vec<&Client> {
        self.clients
            .iter()
            .filter(|c| include_uncontrolled || c.controlled)
            .collect()
    }

    /// Take control of every open page. Returns how many changed hands.
    pub fn claim(&mut self) -> usize {
        let mut claimed = 0;
        for client in self.clients.iter_mut().filter(|c| !c.controlled) {
            client.controlled = true;
            claimed += 1;
        }
        debug!(claimed, "Clients claimed");
        claimed
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<()> {
        let target = self
            .clients
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| ServiceWorkerError::InvalidState(format!("no client {id}")))?;
        if target.client_type != ClientType::Window {
            return Err(ServiceWorkerError::InvalidState(
                "Can only focus window clients".to_string(),
            ));
        }
        for client in &mut self.clients {
            client.focused = client.id == id;
        }
        Ok(())
    }

    /// Open a new focused window at `url`.
    pub fn open_window(&mut self, url: Url) -> &Client {
        let id = self.allocate_id();
        debug!(client = %id, url = %url, "Opening window");
        for client in &mut self.clients {
            client.focused = false;
        }
        self.clients.push(Client {
            id,
            url,
            client_type: ClientType::Window,
            focused: true,
            controlled: true,
            sender: None,
        });
        &self.clients[self.clients.len() - 1]
    }

    /// Post to one client by ID.
    pub fn post_message(&self, id: &str, message: ClientMessage) -> Result<()> {
        let client = self
            .get(id)
            .ok_or_else(|| ServiceWorkerError::InvalidState(format!("no client {id}")))?;
        client.post_message(message)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("client-{}", self.next_id)
    }
}

// ==================== Notifications ====================

/// A notification action button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// Data attached to a notification, handed back on click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
    pub timestamp: i64,
}

/// A shown notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
    pub tag: String,
    pub renotify: bool,
    pub require_interaction: bool,
}

/// Shown notifications, keyed by tag. Showing a tag again replaces it.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: Vec<Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedNotifications {
        Arc::new(RwLock::new(self))
    }

    pub fn show(&mut self, notification: Notification) {
        debug!(tag = %notification.tag, title = %notification.title, "Showing notification");
        match self.shown.iter_mut().find(|n| n.tag == notification.tag) {
            Some(existing) => *existing = notification,
            None => self.shown.push(notification),
        }
    }

    pub fn close(&mut self, tag: &str) -> Option<Notification> {
        let index = self.shown.iter().position(|n| n.tag == tag);
        if index.is_none() {
            warn!(tag, "Closing unknown notification");
        }
        index.map(|i| self.shown.remove(i))
    }

    pub fn get(&self, tag: &str) -> Option<&Notification> {
        self.shown.iter().find(|n| n.tag == tag)
    }

    pub fn all(&self) -> &[Notification] {
        &self.shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_client_message_wire_format() {
        let sync = ClientMessage::BackgroundSyncStart {
            sync_type: "github-data".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&sync).unwrap(),
            serde_json::json!({"type": "BACKGROUND_SYNC_START", "data": {"syncType": "github-data"}})
        );

        let click = ClientMessage::NotificationClicked {
            url: "/repos".to_string(),
            action: "view".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&click).unwrap(),
            serde_json::json!({"type": "NOTIFICATION_CLICKED", "data": {"url": "/repos", "action": "view"}})
        );
    }

    #[test]
    fn test_post_message_reaches_receiver() {
        let mut clients = Clients::new();
        let (id, mut rx) = clients.connect(url("https://devflow.example/"), ClientType::Window);

        let message = ClientMessage::BackgroundSyncStart {
            sync_type: "github-data".to_string(),
        };
        clients.post_message(&id, message.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), message);
    }

    #[test]
    fn test_post_to_dropped_client_fails() {
        let mut clients = Clients::new();
        let (id, rx) = clients.connect(url("https://devflow.example/"), ClientType::Window);
        drop(rx);

        let result = clients.post_message(
            &id,
            ClientMessage::BackgroundSyncStart {
                sync_type: "x".to_string(),
            },
        );
        assert!(matches!(result, Err(ServiceWorkerError::InvalidState(_))));
    }

    #[test]
    fn test_claim_controls_everything_once() {
        let mut clients = Clients::new();
        clients.connect(url("https://devflow.example/a"), ClientType::Window);
        clients.connect(url("https://devflow.example/b"), ClientType::Worker);

        assert!(clients.match_all(false).is_empty());
        assert_eq!(clients.claim(), 2);
        assert_eq!(clients.claim(), 0);
        assert_eq!(clients.match_all(false).len(), 2);
    }

    #[test]
    fn test_focus_moves_between_windows() {
        let mut clients = Clients::new();
        let (a, _rx_a) = clients.connect(url("https://devflow.example/a"), ClientType::Window);
        let (b, _rx_b) = clients.connect(url("https://devflow.example/b"), ClientType::Window);
        let (w, _rx_w) = clients.connect(url("https://devflow.example/w"), ClientType::Worker);

        clients.focus(&a).unwrap();
        clients.focus(&b).unwrap();
        assert!(!clients.get(&a).unwrap().focused);
        assert!(clients.get(&b).unwrap().focused);
        assert!(clients.focus(&w).is_err());
    }

    #[test]
    fn test_open_window_is_focused_and_controlled() {
        let mut clients = Clients::new();
        let opened = clients.open_window(url("https://devflow.example/repos")).clone();

        assert!(opened.focused);
        assert!(opened.controlled);
        assert!(opened
            .post_message(ClientMessage::BackgroundSyncStart {
                sync_type: "x".to_string()
            })
            .is_err());
        assert_eq!(clients.len(), 1);
    }

    fn notification(tag: &str, title: &str) -> Notification {
        Notification {
            title: title.to_string(),
            body: String::new(),
            icon: String::new(),
            badge: String::new(),
            image: None,
            vibrate: vec![],
            data: NotificationData {
                url: "/".to_string(),
                timestamp: 0,
            },
            actions: vec![],
            tag: tag.to_string(),
            renotify: true,
            require_interaction: false,
        }
    }

    #[test]
    fn test_notifications_replace_by_tag() {
        let mut notifications = Notifications::new();
        notifications.show(notification("devflow", "first"));
        notifications.show(notification("devflow", "second"));
        notifications.show(notification("other", "third"));

        assert_eq!(notifications.all().len(), 2);
        assert_eq!(notifications.get("devflow").unwrap().title, "second");

        assert!(notifications.close("devflow").is_some());
        assert!(notifications.close("devflow").is_none());
        assert_eq!(notifications.all().len(), 1);
    }
}
