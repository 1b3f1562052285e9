//! Forwards selected bus events to an external webhook.

use tokio::sync::broadcast;

use crate::bus::PlatformEvent;
use crate::delivery::webhook::WebhookDelivery;

/// Subscribes to the bus and delivers matching events to one URL.
///
/// Delivery failures are logged and dropped; they never propagate back to
/// the publisher.
pub struct WebhookForwarder {
    url: String,
    event_types: Vec<String>,
    delivery: WebhookDelivery,
}

impl WebhookForwarder {
    pub fn new(url: impl Into<String>, event_types: &[&str], delivery: WebhookDelivery) -> Self {
        Self {
            url: url.into(),
            event_types: event_types.iter().map(|t| t.to_string()).collect(),
            delivery,
        }
    }

    pub fn forwards(&self, event: &PlatformEvent) -> bool {
        self.event_types.iter().any(|t| *t == event.event_type)
    }

    /// Run until the bus closes.
    pub async fn run(self, mut receiver: broadcast::Receiver<PlatformEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) if self.forwards(&event) => {
                    if let Err(e) = self.delivery.deliver(&self.url, &event).await {
                        tracing::error!(
                            error = %e,
                            event_type = %event.event_type,
                            "Failed to forward event to webhook"
                        );
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Webhook forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, webhook forwarder shutting down");
                    break;
                }
            }
        }
    }
}
