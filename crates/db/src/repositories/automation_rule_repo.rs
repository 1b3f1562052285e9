//! Repository for the `automation_rules` table.

use adpilot_core::rule::RuleDefinition;
use adpilot_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::automation_rule::{AutomationRuleRow, StoredBody};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "\
    id, owner_id, name, scope, time_range, condition_logic, conditions, actions, steps, \
    target_label_ids, is_active, execution_status, last_run_at, last_run_started_at, \
    last_error, created_at, updated_at";

/// Provides CRUD and run-state operations for automation rules.
pub struct AutomationRuleRepo;

impl AutomationRuleRepo {
    /// Insert a validated rule, returning the created row.
    pub async fn create(
        pool: &PgPool,
        owner_id: DbId,
        definition: &RuleDefinition,
        body: &StoredBody,
        is_active: bool,
    ) -> Result<AutomationRuleRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO automation_rules \
                (owner_id, name, scope, time_range, condition_logic, conditions, actions, \
                 steps, target_label_ids, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AutomationRuleRow>(&query)
            .bind(owner_id)
            .bind(&definition.name)
            .bind(definition.scope.as_str())
            .bind(definition.time_range.as_str())
            .bind(body.condition_logic)
            .bind(&body.conditions)
            .bind(&body.actions)
            .bind(&body.steps)
            .bind(&definition.target_label_ids)
            .bind(is_active)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<AutomationRuleRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM automation_rules WHERE id = $1");
        sqlx::query_as::<_, AutomationRuleRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List rules, optionally filtered by owner and active flag, oldest first.
    pub async fn list(
        pool: &PgPool,
        owner_id: Option<DbId>,
        is_active: Option<bool>,
    ) -> Result<Vec<AutomationRuleRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM automation_rules \
             WHERE ($1::BIGINT IS NULL OR owner_id = $1) \
               AND ($2::BOOLEAN IS NULL OR is_active = $2) \
             ORDER BY id"
        );
        sqlx::query_as::<_, AutomationRuleRow>(&query)
            .bind(owner_id)
            .bind(is_active)
            .fetch_all(pool)
            .await
    }

    /// Replace a rule's definition. Run state is left untouched.
    ///
    /// Returns `None` if no row with the given `id` exists.
    pub async fn update_definition(
        pool: &PgPool,
        id: DbId,
        definition: &RuleDefinition,
        body: &StoredBody,
    ) -> Result<Option<AutomationRuleRow>, sqlx::Error> {
        let query = format!(
            "UPDATE automation_rules SET \
                name = $2, scope = $3, time_range = $4, condition_logic = $5, \
                conditions = $6, actions = $7, steps = $8, target_label_ids = $9, \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AutomationRuleRow>(&query)
            .bind(id)
            .bind(&definition.name)
            .bind(definition.scope.as_str())
            .bind(definition.time_range.as_str())
            .bind(body.condition_logic)
            .bind(&body.conditions)
            .bind(&body.actions)
            .bind(&body.steps)
            .bind(&definition.target_label_ids)
            .fetch_optional(pool)
            .await
    }

    pub async fn set_active(
        pool: &PgPool,
        id: DbId,
        is_active: bool,
    ) -> Result<Option<AutomationRuleRow>, sqlx::Error> {
        let query = format!(
            "UPDATE automation_rules SET is_active = $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AutomationRuleRow>(&query)
            .bind(id)
            .bind(is_active)
            .fetch_optional(pool)
            .await
    }

    /// Delete a rule. Ledger rows and run history are kept.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM automation_rules WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Claim a rule for a run by moving it to `pending`.
    ///
    /// Succeeds unless the rule is already pending with a run started after
    /// `stale_before`. Returns `None` when the claim was refused or the rule
    /// does not exist.
    pub async fn try_begin_run(
        pool: &PgPool,
        id: DbId,
        stale_before: Timestamp,
    ) -> Result<Option<AutomationRuleRow>, sqlx::Error> {
        let query = format!(
            "UPDATE automation_rules SET \
                execution_status = 'pending', last_run_started_at = NOW(), \
                last_error = NULL, updated_at = NOW() \
             WHERE id = $1 \
               AND (execution_status <> 'pending' \
                    OR last_run_started_at IS NULL \
                    OR last_run_started_at < $2) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AutomationRuleRow>(&query)
            .bind(id)
            .bind(stale_before)
            .fetch_optional(pool)
            .await
    }

    /// Persist the observable run state.
    ///
    /// Terminal statuses (`success` / `failed`) also stamp `last_run_at`.
    pub async fn update_execution_status(
        pool: &PgPool,
        id: DbId,
        status: &str,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE automation_rules SET \
                execution_status = $2, \
                last_error = $3, \
                last_run_at = CASE WHEN $2 IN ('success', 'failed') THEN NOW() ELSE last_run_at END, \
                updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
