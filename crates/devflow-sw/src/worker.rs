//! The worker and its event dispatcher.
//!
//! Pages talk to the worker through a [`WorkerHandle`]. Every event goes
//! onto one unbounded queue; the dispatcher loop spawns a task per event so
//! a slow fetch never holds up the next one. Results come back over
//! `oneshot` channels.

use std::sync::Arc;

use bytes::Bytes;
use devflow_common::{Clock, SystemClock};
use devflow_net::{Fetcher, Request, Response};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheStorage, SharedCacheStorage};
use crate::clients::{Clients, Notification, Notifications, SharedClients, SharedNotifications};
use crate::config::WorkerConfig;
use crate::lifecycle::{LifecycleController, WorkerState};
use crate::message::{InboundMessage, Reply};
use crate::route::{Route, Router};
use crate::strategy::Strategies;
use crate::sync::{BackgroundEvents, ClickOutcome};
use crate::{Result, ServiceWorkerError};

/// What the worker did with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The worker answered.
    Respond(Response),
    /// Not intercepted; the caller should go to the network itself.
    Passthrough(Request),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough(_) => None,
        }
    }
}

/// Inbound events, each with the channel its result goes back on.
#[derive(Debug)]
pub enum WorkerEvent {
    Install {
        reply: oneshot::Sender<Result<usize>>,
    },
    Activate {
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
    Fetch {
        request: Request,
        reply: oneshot::Sender<FetchOutcome>,
    },
    Message {
        data: Value,
        reply: oneshot::Sender<Reply>,
    },
    Sync {
        tag: String,
        reply: oneshot::Sender<bool>,
    },
    Push {
        payload: Option<Bytes>,
        reply: oneshot::Sender<Option<Notification>>,
    },
    NotificationClick {
        tag: String,
        action: String,
        reply: oneshot::Sender<Option<ClickOutcome>>,
    },
}

impl WorkerEvent {
    fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Install { .. } => "install",
            WorkerEvent::Activate { .. } => "activate",
            WorkerEvent::Fetch { .. } => "fetch",
            WorkerEvent::Message { .. } => "message",
            WorkerEvent::Sync { .. } => "sync",
            WorkerEvent::Push { .. } => "push",
            WorkerEvent::NotificationClick { .. } => "notificationclick",
        }
    }
}

// ==================== Service Worker ====================

/// The offline caching worker.
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    storage: SharedCacheStorage,
    clients: SharedClients,
    notifications: SharedNotifications,
    router: Router,
    strategies: Strategies,
    lifecycle: LifecycleController,
    background: BackgroundEvents,
}

impl ServiceWorker {
    /// Create a worker over `storage` using the system clock.
    pub fn new(
        config: WorkerConfig,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        Self::with_clock(config, storage, fetcher, Arc::new(SystemClock))
    }

    /// Create a worker with an explicit clock.
    pub fn with_clock(
        config: WorkerConfig,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let storage = storage.shared();
        let clients = Clients::new().shared();
        let notifications = Notifications::new().shared();

        let router = Router::new(&config);
        let strategies = Strategies::new(
            config.clone(),
            storage.clone(),
            fetcher.clone(),
            clock.clone(),
        );
        let lifecycle =
            LifecycleController::new(config.clone(), storage.clone(), fetcher, clients.clone());
        let background =
            BackgroundEvents::new(config.clone(), clients.clone(), notifications.clone(), clock);

        Ok(Self {
            config,
            storage,
            clients,
            notifications,
            router,
            strategies,
            lifecycle,
            background,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn storage(&self) -> &SharedCacheStorage {
        &self.storage
    }

    pub fn clients(&self) -> &SharedClients {
        &self.clients
    }

    pub fn notifications(&self) -> &SharedNotifications {
        &self.notifications
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.state().await
    }

    // ==================== Lifecycle ====================

    /// Pre-cache static assets. A successful install asks to skip waiting,
    /// so the worker activates straight away.
    pub async fn install(&self) -> Result<usize> {
        let count = self.lifecycle.install().await?;
        if self.lifecycle.skip_waiting_requested() {
            self.activate().await?;
        }
        Ok(count)
    }

    pub async fn activate(&self) -> Result<Vec<String>> {
        self.lifecycle.activate().await
    }

    /// Resume over storage populated by an earlier install. Returns whether
    /// the worker is now active.
    pub async fn resume(&self) -> bool {
        self.lifecycle.resume().await
    }

    /// The route `request` would take.
    pub fn route(&self, request: &Request) -> Route {
        self.router.select(request)
    }

    // ==================== Fetch ====================

    /// Answer an intercepted request. Until activation nothing is
    /// intercepted.
    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        let state = self.state().await;
        if state != WorkerState::Activated {
            trace!(url = %request.url, ?state, "Worker not active, passing through");
            return FetchOutcome::Passthrough(request);
        }

        let route = self.router.select(&request);
        debug!(url = %request.url, %route, "Handling fetch");
        if route == Route::Passthrough {
            return FetchOutcome::Passthrough(request);
        }
        match self.strategies.respond(route, &request).await {
            Some(response) => FetchOutcome::Respond(response),
            None => FetchOutcome::Passthrough(request),
        }
    }

    // ==================== Messages ====================

    /// Handle a runtime message. Malformed messages are ignored.
    pub async fn handle_message(&self, data: Value) -> Option<Reply> {
        let message = match InboundMessage::from_value(data) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring message");
                return None;
            }
        };
        debug!(?message, "Message received");

        let reply = match message {
            InboundMessage::SkipWaiting => {
                if self.lifecycle.skip_waiting().await {
                    if let Err(e) = self.lifecycle.activate().await {
                        warn!(error = %e, "Skip-waiting activation failed");
                    }
                }
                Reply::success()
            }
            InboundMessage::GetCacheSize => Reply::CacheSize {
                cache_size: self.lifecycle.cache_size().await,
            },
            InboundMessage::ClearCache => {
                self.lifecycle.clear_stale_caches().await;
                Reply::success()
            }
        };

        message.expects_reply().then_some(reply)
    }

    // ==================== Background ====================

    pub async fn handle_sync(&self, tag: &str) -> bool {
        self.background.handle_sync(tag).await
    }

    pub async fn handle_push(&self, payload: Option<Bytes>) -> Option<Notification> {
        self.background.handle_push(payload.as_deref()).await
    }

    pub async fn handle_notification_click(&self, tag: &str, action: &str) -> Option<ClickOutcome> {
        self.background.handle_notification_click(tag, action).await
    }

    // ==================== Dispatcher ====================

    /// Spawn the dispatcher loop. The loop ends when every handle is
    /// dropped.
    pub fn start(self: Arc<Self>) -> (WorkerHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();

        let task = tokio::spawn(async move {
            info!("Worker event loop started");
            while let Some(event) = rx.recv().await {
                trace!(kind = event.kind(), "Dispatching event");
                let worker = Arc::clone(&self);
                tokio::spawn(async move { worker.dispatch(event).await });
            }
            info!("Worker event loop stopped");
        });

        (WorkerHandle { tx }, task)
    }

    async fn dispatch(&self, event: WorkerEvent) {
        // A dropped reply receiver means the caller stopped waiting.
        match event {
            WorkerEvent::Install { reply } => {
                let _ = reply.send(self.install().await);
            }
            WorkerEvent::Activate { reply } => {
                let _ = reply.send(self.activate().await);
            }
            WorkerEvent::Fetch { request, reply } => {
                let _ = reply.send(self.handle_fetch(request).await);
            }
            WorkerEvent::Message { data, reply } => {
                if let Some(answer) = self.handle_message(data).await {
                    let _ = reply.send(answer);
                }
            }
            WorkerEvent::Sync { tag, reply } => {
                let _ = reply.send(self.handle_sync(&tag).await);
            }
            WorkerEvent::Push { payload, reply } => {
                let _ = reply.send(self.handle_push(payload).await);
            }
            WorkerEvent::NotificationClick { tag, action, reply } => {
                let _ = reply.send(self.handle_notification_click(&tag, &action).await);
            }
        }
    }
}

// ==================== Handle ====================

/// Sending side of the worker's event queue.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
    fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WorkerEvent,
    ) -> Result<oneshot::Receiver<T>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| ServiceWorkerError::InvalidState("worker stopped".to_string()))?;
        Ok(rx)
    }

    fn dropped() -> ServiceWorkerError {
        ServiceWorkerError::InvalidState("worker dropped the event".to_string())
    }

    pub async fn install(&self) -> Result<usize> {
        let rx = self.call(|reply| WorkerEvent::Install { reply })?;
        rx.await.map_err(|_| Self::dropped())?
    }

    pub async fn activate(&self) -> Result<Vec<String>> {
        let rx = self.call(|reply| WorkerEvent::Activate { reply })?;
        rx.await.map_err(|_| Self::dropped())?
    }

    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
        let rx = self.call(|reply| WorkerEvent::Fetch { request, reply })?;
        rx.await.map_err(|_| Self::dropped())
    }

    /// Post a runtime message. `None` when the message has no reply or was
    /// not understood.
    pub async fn post_message(&self, data: Value) -> Result<Option<Reply>> {
        let rx = self.call(|reply| WorkerEvent::Message { data, reply })?;
        Ok(rx.await.ok())
    }

    pub async fn sync(&self, tag: impl Into<String>) -> Result<bool> {
        let tag = tag.into();
        let rx = self.call(|reply| WorkerEvent::Sync { tag, reply })?;
        rx.await.map_err(|_| Self::dropped())
    }

    pub async fn push(&self, payload: Option<Bytes>) -> Result<Option<Notification>> {
        let rx = self.call(|reply| WorkerEvent::Push { payload, reply })?;
        rx.await.map_err(|_| Self::dropped())
    }

    pub async fn notification_click(
        &self,
        tag: impl Into<String>,
        action: impl Into<String>,
    ) -> Result<Option<ClickOutcome>> {
        let (tag, action) = (tag.into(), action.into());
        let rx = self.call(|reply| WorkerEvent::NotificationClick { tag, action, reply })?;
        rx.await.map_err(|_| Self::dropped())
    }
}
