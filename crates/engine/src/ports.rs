//! Collaborator interfaces the orchestrator depends on.
//!
//! Each port is an object-safe `async_trait` held as `Arc<dyn ...>`, so the
//! Postgres/HTTP adapters and the in-memory test fakes are interchangeable.

use std::time::Duration;

use adpilot_core::action::ResolvedAction;
use adpilot_core::ledger::{ExecutionRecord, LedgerEntry};
use adpilot_core::metrics::{EntityState, EntityType, MetricsRow};
use adpilot_core::rule::{AutomationRule, ExecutionStatus, TimeRange};
use adpilot_core::run::{RunReport, RunSummary};
use adpilot_core::types::{DbId, Timestamp};
use async_trait::async_trait;

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Gateway errors
// ---------------------------------------------------------------------------

/// How the Action Gateway refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Too many requests; retried with backoff.
    RateLimited,
    /// Credentials rejected; aborts the run.
    Auth,
    /// The platform refused this particular mutation.
    Rejected,
    NotFound,
    /// Network failure, timeout or 5xx.
    Transport,
}

impl GatewayErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Auth => "auth",
            Self::Rejected => "rejected",
            Self::NotFound => "not_found",
            Self::Transport => "transport",
        }
    }

    /// Fatal kinds stop the whole run instead of failing one entity.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth)
    }
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub detail: String,
    /// Server-provided wait hint for rate-limit responses.
    pub retry_after: Option<Duration>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Source of performance snapshots.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Rows for every entity of `scope` owned by `owner_id`. An empty vector
    /// means no data has been synced for the time range.
    async fn fetch_metrics(
        &self,
        scope: EntityType,
        time_range: TimeRange,
        owner_id: DbId,
    ) -> Result<Vec<MetricsRow>, EngineError>;

    /// Reflect a gateway-confirmed state change in the snapshot store.
    async fn record_entity_state(
        &self,
        _owner_id: DbId,
        _entity_type: EntityType,
        _entity_id: &str,
        _state: &EntityState,
    ) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Applies mutations on the advertising platform.
#[async_trait]
pub trait ActionGateway: Send + Sync {
    /// Apply one action and return the entity's state afterwards.
    async fn apply_action(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        action: &ResolvedAction,
    ) -> Result<EntityState, GatewayError>;
}

/// Rule storage plus the run-claim and run-history operations.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_active_rules(
        &self,
        owner_id: Option<DbId>,
    ) -> Result<Vec<AutomationRule>, EngineError>;

    /// Fails with `CoreError::NotFound` for an unknown id.
    async fn get_rule(&self, rule_id: DbId) -> Result<AutomationRule, EngineError>;

    /// Atomically move the rule to `pending`. Returns `false` when another
    /// run already holds it.
    async fn begin_run(&self, rule_id: DbId) -> Result<bool, EngineError>;

    async fn update_execution_status(
        &self,
        rule_id: DbId,
        status: ExecutionStatus,
        detail: Option<&str>,
    ) -> Result<(), EngineError>;

    async fn save_run_report(&self, report: &RunReport) -> Result<(), EngineError>;
}

/// Result of a guarded ledger write.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerWrite {
    Applied(ExecutionRecord),
    /// The record changed since it was read; nothing was written.
    Conflict,
}

/// Storage for the idempotency ledger.
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    async fn find(
        &self,
        rule_id: DbId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ExecutionRecord>, EngineError>;

    /// Upsert `entry` only if the stored `last_executed_at` still equals
    /// `expected` (`None` meaning "no record yet").
    async fn write_if_unchanged(
        &self,
        entry: &LedgerEntry,
        expected: Option<Timestamp>,
    ) -> Result<LedgerWrite, EngineError>;
}

/// Delivers run summaries to the rule owner.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, owner_id: DbId, summary: &RunSummary) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_is_fatal() {
        assert!(GatewayErrorKind::Auth.is_fatal());
        for kind in [
            GatewayErrorKind::RateLimited,
            GatewayErrorKind::Rejected,
            GatewayErrorKind::NotFound,
            GatewayErrorKind::Transport,
        ] {
            assert!(!kind.is_fatal(), "{kind} should not be fatal");
        }
    }

    #[test]
    fn error_display_names_kind() {
        let err = GatewayError::new(GatewayErrorKind::Rejected, "budget too low");
        assert_eq!(err.to_string(), "rejected: budget too low");
    }
}
