//! Repository for the `rule_execution_records` table (idempotency ledger).
//!
//! Every write is a single-statement upsert keyed by
//! `(rule_id, entity_type, entity_id)`, guarded by the `last_executed_at`
//! value the caller last read. A guard mismatch means another writer got
//! there first and the write is reported as not applied.

use adpilot_core::ledger::LedgerEntry;
use adpilot_core::metrics::EntityType;
use adpilot_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::execution_record::ExecutionRecordRow;

/// Column list for `rule_execution_records` queries.
const COLUMNS: &str = "\
    id, rule_id, entity_type, entity_id, last_action_type, execution_count, \
    last_executed_at, last_budget_before, last_budget_after, metadata, created_at, updated_at";

/// Provides read and compare-and-set write operations for ledger rows.
pub struct RuleExecutionRepo;

impl RuleExecutionRepo {
    pub async fn find(
        pool: &PgPool,
        rule_id: DbId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ExecutionRecordRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM rule_execution_records \
             WHERE rule_id = $1 AND entity_type = $2 AND entity_id = $3"
        );
        sqlx::query_as::<_, ExecutionRecordRow>(&query)
            .bind(rule_id)
            .bind(entity_type.as_str())
            .bind(entity_id)
            .fetch_optional(pool)
            .await
    }

    /// List a rule's ledger rows, most recently executed first.
    pub async fn list_by_rule(
        pool: &PgPool,
        rule_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionRecordRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM rule_execution_records \
             WHERE rule_id = $1 \
             ORDER BY last_executed_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, ExecutionRecordRow>(&query)
            .bind(rule_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Insert or update the ledger row for `entry`.
    ///
    /// `expected_last_executed_at` is the `last_executed_at` the caller read
    /// (`None` if it saw no row). Returns `None` if the stored row no longer
    /// matches, in which case nothing was written.
    pub async fn upsert_if_unchanged(
        pool: &PgPool,
        entry: &LedgerEntry,
        expected_last_executed_at: Option<Timestamp>,
    ) -> Result<Option<ExecutionRecordRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO rule_execution_records \
                (rule_id, entity_type, entity_id, last_action_type, execution_count, \
                 last_executed_at, last_budget_before, last_budget_after, metadata) \
             VALUES ($1, $2, $3, $4, 1, NOW(), $5, $6, $7) \
             ON CONFLICT ON CONSTRAINT uq_rule_execution_records_key DO UPDATE SET \
                last_action_type = EXCLUDED.last_action_type, \
                execution_count = rule_execution_records.execution_count + 1, \
                last_executed_at = EXCLUDED.last_executed_at, \
                last_budget_before = EXCLUDED.last_budget_before, \
                last_budget_after = EXCLUDED.last_budget_after, \
                metadata = EXCLUDED.metadata, \
                updated_at = NOW() \
             WHERE rule_execution_records.last_executed_at IS NOT DISTINCT FROM $8::TIMESTAMPTZ \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ExecutionRecordRow>(&query)
            .bind(entry.rule_id)
            .bind(entry.entity_type.as_str())
            .bind(&entry.entity_id)
            .bind(entry.action_type.as_str())
            .bind(entry.budget_before)
            .bind(entry.budget_after)
            .bind(&entry.metadata)
            .bind(expected_last_executed_at)
            .fetch_optional(pool)
            .await
    }

    pub async fn count_by_rule(pool: &PgPool, rule_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM rule_execution_records WHERE rule_id = $1")
            .bind(rule_id)
            .fetch_one(pool)
            .await
    }
}
