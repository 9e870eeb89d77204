//! Fire-and-forget notifications.
//!
//! Pipeline code publishes [`NotificationEvent`]s through a [`Notifier`]; the
//! [`WebhookDispatcher`] listens on the bus and delivers them to the owning
//! search's webhook URL.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::clients::WebhookClient;
use crate::db::Store;
use crate::domain::events::NotificationEvent;

pub trait Notifier: Send + Sync {
    /// Publishes an event. Never fails; delivery problems are logged.
    fn notify(&self, event: NotificationEvent);
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NotificationEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

impl Notifier for EventBus {
    fn notify(&self, event: NotificationEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!(event = name, "No listeners for notification");
        }
    }
}

pub struct WebhookDispatcher {
    store: Store,
    client: WebhookClient,
    enabled: bool,
}

impl WebhookDispatcher {
    #[must_use]
    pub const fn new(store: Store, client: WebhookClient, enabled: bool) -> Self {
        Self {
            store,
            client,
            enabled,
        }
    }

    pub fn start_listener(self: Arc<Self>, bus: &EventBus) {
        let mut rx = bus.subscribe();
        let dispatcher = self;

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = dispatcher.dispatch(&event).await {
                            warn!(
                                event = event.name(),
                                search_id = %event.search_id(),
                                error = %e,
                                "Webhook delivery failed"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        error!(count, "Webhook listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Webhook listener event bus closed");
                        break;
                    }
                }
            }
        });
    }

    async fn dispatch(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        // Only outcomes are delivered externally.
        if !self.enabled || matches!(event, NotificationEvent::ScrapeStarted { .. }) {
            return Ok(());
        }

        let Some(search) = self.store.get_search(event.search_id()).await? else {
            return Ok(());
        };
        let Some(url) = search.webhook_url.filter(|u| !u.trim().is_empty()) else {
            return Ok(());
        };

        self.client.send(&url, event).await?;
        debug!(event = event.name(), url = %url, "Webhook delivered");
        Ok(())
    }
}
