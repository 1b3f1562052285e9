//! Event bus and notification delivery for the automation rule engine.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the event envelope.
//! - [`EventPersistence`]: background writer of every event to `events`.
//! - [`WebhookForwarder`]: forwards selected events to an external URL via
//!   [`WebhookDelivery`].

pub mod bus;
pub mod delivery;
pub mod forwarder;
pub mod persistence;

pub use bus::{EventBus, PlatformEvent};
pub use delivery::webhook::WebhookDelivery;
pub use forwarder::WebhookForwarder;
pub use persistence::EventPersistence;
