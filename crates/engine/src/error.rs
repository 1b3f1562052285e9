use adpilot_core::error::CoreError;
use adpilot_core::types::DbId;

/// Errors surfaced by the orchestrator and its adapters.
///
/// Per-entity gateway failures are not errors at this level; they are
/// recorded in the run result. Only conditions that stop a run (or prevent
/// it from starting) appear here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Another run of the same rule holds the claim.
    #[error("Rule {0} already has a run in progress")]
    AlreadyRunning(DbId),

    #[error("Metrics unavailable: {0}")]
    MetricsUnavailable(String),

    /// Credentials were rejected; every further call would fail the same way.
    #[error("Action gateway rejected credentials: {0}")]
    GatewayAuth(String),

    #[error("Execution ledger error: {0}")]
    Ledger(String),
}
