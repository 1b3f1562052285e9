//! Notification sink that publishes run summaries on the event bus.

use std::sync::Arc;

use adpilot_core::error::CoreError;
use adpilot_core::run::RunSummary;
use adpilot_core::types::DbId;
use adpilot_events::bus::RULE_RUN_COMPLETED;
use adpilot_events::{EventBus, PlatformEvent};
use async_trait::async_trait;

use crate::error::EngineError;
use crate::ports::NotificationSink;

/// Publishes [`RULE_RUN_COMPLETED`] events. Persistence and webhook
/// forwarding are separate bus subscribers.
pub struct EventBusNotifier {
    bus: Arc<EventBus>,
}

impl EventBusNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn event_for(owner_id: DbId, summary: &RunSummary) -> Result<PlatformEvent, EngineError> {
        let mut payload = serde_json::to_value(summary)
            .map_err(|e| CoreError::Internal(format!("failed to encode run summary: {e}")))?;
        payload["headline"] = serde_json::Value::String(summary.headline());

        Ok(PlatformEvent::new(RULE_RUN_COMPLETED)
            .with_source("automation_rule", summary.rule_id)
            .with_actor(owner_id)
            .with_payload(payload))
    }
}

#[async_trait]
impl NotificationSink for EventBusNotifier {
    async fn notify(&self, owner_id: DbId, summary: &RunSummary) -> Result<(), EngineError> {
        self.bus.publish(Self::event_for(owner_id, summary)?);
        Ok(())
    }
}
