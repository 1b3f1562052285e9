//! Idempotency ledger row model.

use adpilot_core::error::CoreError;
use adpilot_core::ledger::ExecutionRecord;
use adpilot_core::metrics::EntityType;
use adpilot_core::rule::ActionType;
use adpilot_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `rule_execution_records` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExecutionRecordRow {
    pub id: DbId,
    pub rule_id: DbId,
    pub entity_type: String,
    pub entity_id: String,
    pub last_action_type: String,
    pub execution_count: i32,
    pub last_executed_at: Timestamp,
    pub last_budget_before: Option<f64>,
    pub last_budget_after: Option<f64>,
    pub metadata: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ExecutionRecordRow {
    pub fn into_domain(self) -> Result<ExecutionRecord, CoreError> {
        Ok(ExecutionRecord {
            rule_id: self.rule_id,
            entity_type: EntityType::from_str(&self.entity_type)?,
            entity_id: self.entity_id,
            last_action_type: ActionType::from_str(&self.last_action_type)?,
            execution_count: self.execution_count,
            last_executed_at: self.last_executed_at,
            last_budget_before: self.last_budget_before,
            last_budget_after: self.last_budget_after,
            metadata: self.metadata,
        })
    }
}
