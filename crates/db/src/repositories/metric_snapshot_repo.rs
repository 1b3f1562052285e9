//! Repository for the `entity_metric_snapshots` table.

use adpilot_core::metrics::{EntityState, EntityType};
use adpilot_core::rule::TimeRange;
use adpilot_core::types::DbId;
use sqlx::PgPool;

use crate::models::metric_snapshot::{MetricSnapshot, UpsertMetricSnapshot};

const COLUMNS: &str = "\
    id, owner_id, entity_type, entity_id, time_range, name, spend, impressions, clicks, \
    results, current_budget, status, label_ids, extra_metrics, synced_at";

/// Provides snapshot reads for the metrics provider and writes for sync.
pub struct MetricSnapshotRepo;

impl MetricSnapshotRepo {
    /// All snapshots for one owner, scope and time range, in sync order.
    pub async fn list_for_scope(
        pool: &PgPool,
        owner_id: DbId,
        entity_type: EntityType,
        time_range: TimeRange,
    ) -> Result<Vec<MetricSnapshot>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM entity_metric_snapshots \
             WHERE owner_id = $1 AND entity_type = $2 AND time_range = $3 \
             ORDER BY id"
        );
        sqlx::query_as::<_, MetricSnapshot>(&query)
            .bind(owner_id)
            .bind(entity_type.as_str())
            .bind(time_range.as_str())
            .fetch_all(pool)
            .await
    }

    /// Insert or refresh one entity's snapshot for a time range.
    pub async fn upsert(
        pool: &PgPool,
        input: &UpsertMetricSnapshot,
    ) -> Result<MetricSnapshot, sqlx::Error> {
        let query = format!(
            "INSERT INTO entity_metric_snapshots \
                (owner_id, entity_type, entity_id, time_range, name, spend, impressions, \
                 clicks, results, current_budget, status, label_ids, extra_metrics, synced_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
                     COALESCE($13, '{{}}'::jsonb), NOW()) \
             ON CONFLICT ON CONSTRAINT uq_entity_metric_snapshots_key DO UPDATE SET \
                name = EXCLUDED.name, \
                spend = EXCLUDED.spend, \
                impressions = EXCLUDED.impressions, \
                clicks = EXCLUDED.clicks, \
                results = EXCLUDED.results, \
                current_budget = EXCLUDED.current_budget, \
                status = EXCLUDED.status, \
                label_ids = EXCLUDED.label_ids, \
                extra_metrics = EXCLUDED.extra_metrics, \
                synced_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, MetricSnapshot>(&query)
            .bind(input.owner_id)
            .bind(&input.entity_type)
            .bind(&input.entity_id)
            .bind(&input.time_range)
            .bind(&input.name)
            .bind(input.spend)
            .bind(input.impressions)
            .bind(input.clicks)
            .bind(input.results)
            .bind(input.current_budget)
            .bind(&input.status)
            .bind(&input.label_ids)
            .bind(&input.extra_metrics)
            .fetch_one(pool)
            .await
    }

    /// Overwrite the mutable state of an entity across every time range.
    ///
    /// Called after a successful action so the next evaluation sees the
    /// state the platform reported, not the pre-action snapshot.
    pub async fn apply_entity_state(
        pool: &PgPool,
        owner_id: DbId,
        entity_type: EntityType,
        entity_id: &str,
        state: &EntityState,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE entity_metric_snapshots SET \
                status = $4, current_budget = $5, label_ids = $6 \
             WHERE owner_id = $1 AND entity_type = $2 AND entity_id = $3",
        )
        .bind(owner_id)
        .bind(entity_type.as_str())
        .bind(entity_id)
        .bind(state.status.as_str())
        .bind(state.current_budget)
        .bind(&state.label_ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
