//! Synced entity performance snapshot model and DTOs.

use std::collections::BTreeMap;

use adpilot_core::error::CoreError;
use adpilot_core::metrics::{EntityStatus, EntityType, MetricsRow};
use adpilot_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `entity_metric_snapshots` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MetricSnapshot {
    pub id: DbId,
    pub owner_id: DbId,
    pub entity_type: String,
    pub entity_id: String,
    pub time_range: String,
    pub name: String,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub results: f64,
    pub current_budget: Option<f64>,
    pub status: String,
    pub label_ids: Vec<String>,
    pub extra_metrics: serde_json::Value,
    pub synced_at: Timestamp,
}

impl MetricSnapshot {
    /// Convert into the evaluator's row type.
    ///
    /// Non-numeric entries in `extra_metrics` are dropped rather than failing
    /// the whole snapshot.
    pub fn into_metrics_row(self) -> Result<MetricsRow, CoreError> {
        let extra_metrics: BTreeMap<String, f64> = match self.extra_metrics {
            serde_json::Value::Object(map) => map
                .into_iter()
                .filter_map(|(k, v)| v.as_f64().map(|n| (k, n)))
                .collect(),
            _ => BTreeMap::new(),
        };
        Ok(MetricsRow {
            entity_id: self.entity_id,
            entity_type: EntityType::from_str(&self.entity_type)?,
            name: self.name,
            spend: self.spend,
            impressions: self.impressions,
            clicks: self.clicks,
            results: self.results,
            current_budget: self.current_budget,
            status: EntityStatus::parse_lenient(&self.status),
            label_ids: self.label_ids,
            extra_metrics,
        })
    }
}

/// DTO for writing one entity's snapshot (used by the sync job and tests).
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertMetricSnapshot {
    pub owner_id: DbId,
    pub entity_type: String,
    pub entity_id: String,
    pub time_range: String,
    pub name: String,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub results: f64,
    pub current_budget: Option<f64>,
    pub status: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub extra_metrics: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_metrics_keep_only_numbers() {
        let snapshot = MetricSnapshot {
            id: 1,
            owner_id: 1,
            entity_type: "campaign".to_string(),
            entity_id: "c1".to_string(),
            time_range: "today".to_string(),
            name: "Spring".to_string(),
            spend: 10.0,
            impressions: 100,
            clicks: 3,
            results: 1.0,
            current_budget: Some(50_000.0),
            status: "ACTIVE".to_string(),
            label_ids: vec!["a".to_string()],
            extra_metrics: serde_json::json!({"roas": 2.5, "note": "x"}),
            synced_at: chrono::Utc::now(),
        };
        let row = snapshot.into_metrics_row().unwrap();
        assert_eq!(row.status, EntityStatus::Active);
        assert_eq!(row.extra_metrics.len(), 1);
        assert_eq!(row.extra_metrics["roas"], 2.5);
    }
}
