//! Production implementations of the engine ports.

pub mod http_gateway;
pub mod notifier;
pub mod postgres;

use std::sync::Arc;

use adpilot_db::DbPool;
use adpilot_events::EventBus;

pub use http_gateway::HttpActionGateway;
pub use notifier::EventBusNotifier;
pub use postgres::{PgExecutionLedger, PgMetricsProvider, PgRuleStore};

use crate::config::EngineConfig;
use crate::orchestrator::{Collaborators, Orchestrator};

/// Wire an orchestrator to Postgres, the HTTP gateway and the event bus.
pub fn build_orchestrator(
    pool: DbPool,
    bus: Arc<EventBus>,
    config: &EngineConfig,
) -> Result<Orchestrator, reqwest::Error> {
    let gateway = HttpActionGateway::new(config.gateway_url.clone(), config.gateway_token.clone())?;
    let collaborators = Collaborators {
        rules: Arc::new(PgRuleStore::new(pool.clone(), config.stale_run_after)),
        metrics: Arc::new(PgMetricsProvider::new(pool.clone())),
        gateway: Arc::new(gateway),
        ledger: Arc::new(PgExecutionLedger::new(pool)),
        notifier: Arc::new(EventBusNotifier::new(bus)),
    };
    Ok(Orchestrator::new(collaborators, config))
}
