use std::sync::Arc;

use adpilot_engine::Orchestrator;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub pool: adpilot_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Publishes rule lifecycle and run events.
    pub event_bus: Arc<adpilot_events::EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    /// Live runs started from the API, awaited on shutdown.
    pub background_runs: TaskTracker,
}
