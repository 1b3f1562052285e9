//! Postgres-backed ports built on the `adpilot-db` repositories.

use std::time::Duration;

use adpilot_core::error::CoreError;
use adpilot_core::ledger::{ExecutionRecord, LedgerEntry};
use adpilot_core::metrics::{EntityState, EntityType, MetricsRow};
use adpilot_core::rule::{AutomationRule, ExecutionStatus, TimeRange};
use adpilot_core::run::RunReport;
use adpilot_core::types::{DbId, Timestamp};
use adpilot_db::repositories::{
    AutomationRuleRepo, MetricSnapshotRepo, RuleExecutionRepo, RuleRunRepo,
};
use adpilot_db::DbPool;
use async_trait::async_trait;
use chrono::Utc;

use crate::error::EngineError;
use crate::ports::{ExecutionLedger, LedgerWrite, MetricsProvider, RuleStore};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

pub struct PgRuleStore {
    pool: DbPool,
    stale_run_after: Duration,
}

impl PgRuleStore {
    pub fn new(pool: DbPool, stale_run_after: Duration) -> Self {
        Self {
            pool,
            stale_run_after,
        }
    }
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn list_active_rules(
        &self,
        owner_id: Option<DbId>,
    ) -> Result<Vec<AutomationRule>, EngineError> {
        let rows = AutomationRuleRepo::list(&self.pool, owner_id, Some(true)).await?;
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.into_domain() {
                Ok(rule) => rules.push(rule),
                // One unreadable row must not stop scheduling for the rest.
                Err(e) => tracing::error!(rule_id = id, error = %e, "Skipping undecodable rule"),
            }
        }
        Ok(rules)
    }

    async fn get_rule(&self, rule_id: DbId) -> Result<AutomationRule, EngineError> {
        let row = AutomationRuleRepo::find_by_id(&self.pool, rule_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "AutomationRule",
                id: rule_id,
            })?;
        Ok(row.into_domain()?)
    }

    async fn begin_run(&self, rule_id: DbId) -> Result<bool, EngineError> {
        let stale = chrono::Duration::from_std(self.stale_run_after)
            .map_err(|e| CoreError::Internal(format!("stale run window out of range: {e}")))?;
        let claimed = AutomationRuleRepo::try_begin_run(&self.pool, rule_id, Utc::now() - stale)
            .await?
            .is_some();
        Ok(claimed)
    }

    async fn update_execution_status(
        &self,
        rule_id: DbId,
        status: ExecutionStatus,
        detail: Option<&str>,
    ) -> Result<(), EngineError> {
        AutomationRuleRepo::update_execution_status(&self.pool, rule_id, status.as_str(), detail)
            .await?;
        Ok(())
    }

    async fn save_run_report(&self, report: &RunReport) -> Result<(), EngineError> {
        RuleRunRepo::insert(&self.pool, report).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct PgExecutionLedger {
    pool: DbPool,
}

impl PgExecutionLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLedger for PgExecutionLedger {
    async fn find(
        &self,
        rule_id: DbId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ExecutionRecord>, EngineError> {
        let row = RuleExecutionRepo::find(&self.pool, rule_id, entity_type, entity_id).await?;
        Ok(row.map(|r| r.into_domain()).transpose()?)
    }

    async fn write_if_unchanged(
        &self,
        entry: &LedgerEntry,
        expected: Option<Timestamp>,
    ) -> Result<LedgerWrite, EngineError> {
        match RuleExecutionRepo::upsert_if_unchanged(&self.pool, entry, expected).await? {
            Some(row) => Ok(LedgerWrite::Applied(row.into_domain()?)),
            None => Ok(LedgerWrite::Conflict),
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Reads the synced `entity_metric_snapshots` table.
pub struct PgMetricsProvider {
    pool: DbPool,
}

impl PgMetricsProvider {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsProvider for PgMetricsProvider {
    async fn fetch_metrics(
        &self,
        scope: EntityType,
        time_range: TimeRange,
        owner_id: DbId,
    ) -> Result<Vec<MetricsRow>, EngineError> {
        let snapshots = MetricSnapshotRepo::list_for_scope(&self.pool, owner_id, scope, time_range)
            .await
            .map_err(|e| EngineError::MetricsUnavailable(e.to_string()))?;
        snapshots
            .into_iter()
            .map(|s| s.into_metrics_row().map_err(EngineError::from))
            .collect()
    }

    async fn record_entity_state(
        &self,
        owner_id: DbId,
        entity_type: EntityType,
        entity_id: &str,
        state: &EntityState,
    ) -> Result<(), EngineError> {
        MetricSnapshotRepo::apply_entity_state(&self.pool, owner_id, entity_type, entity_id, state)
            .await?;
        Ok(())
    }
}
