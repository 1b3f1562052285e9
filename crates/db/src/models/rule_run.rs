//! Run history row model.

use adpilot_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `automation_rule_runs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RuleRunRow {
    pub id: DbId,
    pub run_id: Uuid,
    pub rule_id: DbId,
    pub owner_id: DbId,
    pub run_trigger: String,
    pub dry_run: bool,
    pub status: String,
    pub no_data: bool,
    pub matched_count: i32,
    pub executed_count: i32,
    pub succeeded_count: i32,
    pub failed_count: i32,
    pub skipped_count: i32,
    /// Per-entity outcomes as serialized `EntityActionResult`s.
    pub results: serde_json::Value,
    /// Planned actions for dry runs.
    pub previews: serde_json::Value,
    pub error: Option<String>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub created_at: Timestamp,
}
