//! Repository for the `automation_rule_runs` table.

use adpilot_core::run::RunReport;
use adpilot_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::rule_run::RuleRunRow;

const COLUMNS: &str = "\
    id, run_id, rule_id, owner_id, run_trigger, dry_run, status, no_data, matched_count, \
    executed_count, succeeded_count, failed_count, skipped_count, results, previews, error, \
    started_at, finished_at, created_at";

/// Provides write-once and listing operations for run history.
pub struct RuleRunRepo;

impl RuleRunRepo {
    /// Persist a finished run.
    pub async fn insert(pool: &PgPool, report: &RunReport) -> Result<RuleRunRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO automation_rule_runs \
                (run_id, rule_id, owner_id, run_trigger, dry_run, status, no_data, \
                 matched_count, executed_count, succeeded_count, failed_count, skipped_count, \
                 results, previews, error, started_at, finished_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {COLUMNS}"
        );
        let result = &report.result;
        sqlx::query_as::<_, RuleRunRow>(&query)
            .bind(report.run_id)
            .bind(report.rule_id)
            .bind(report.owner_id)
            .bind(report.trigger.as_str())
            .bind(result.dry_run)
            .bind(report.status.as_str())
            .bind(report.no_data)
            .bind(count(result.matched_count))
            .bind(count(result.executed_count))
            .bind(count(result.succeeded_count))
            .bind(count(result.failed_count))
            .bind(count(result.skipped_count))
            .bind(Json(&result.per_entity_results))
            .bind(Json(&report.previews))
            .bind(&report.error)
            .bind(report.started_at)
            .bind(report.finished_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_run_id(
        pool: &PgPool,
        run_id: Uuid,
    ) -> Result<Option<RuleRunRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM automation_rule_runs WHERE run_id = $1");
        sqlx::query_as::<_, RuleRunRow>(&query)
            .bind(run_id)
            .fetch_optional(pool)
            .await
    }

    /// List a rule's runs, newest first.
    pub async fn list_by_rule(
        pool: &PgPool,
        rule_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RuleRunRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM automation_rule_runs \
             WHERE rule_id = $1 \
             ORDER BY started_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, RuleRunRow>(&query)
            .bind(rule_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
