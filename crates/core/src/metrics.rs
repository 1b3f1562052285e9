//! Performance snapshot types consumed by the condition evaluator.
//!
//! A [`MetricsRow`] is one entity's current snapshot as returned by the
//! metrics provider for a rule's scope and time range. [`Metric`] names the
//! values a condition can compare against, including derived ratios.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

/// Entity granularity on the ad platform. Doubles as a rule's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Campaign,
    Adset,
    Ad,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Campaign => "campaign",
            Self::Adset => "adset",
            Self::Ad => "ad",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "campaign" => Ok(Self::Campaign),
            "adset" => Ok(Self::Adset),
            "ad" => Ok(Self::Ad),
            _ => Err(CoreError::Validation(format!(
                "Invalid scope: '{s}'. Must be one of: campaign, adset, ad"
            ))),
        }
    }

    /// Budgets live on campaigns and ad sets, never on individual ads.
    pub fn carries_budget(&self) -> bool {
        !matches!(self, Self::Ad)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EntityStatus
// ---------------------------------------------------------------------------

/// Delivery status of an entity as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Paused,
    Archived,
    Deleted,
    #[serde(other)]
    Unknown,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parse used for platform-reported values; never fails.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "active" | "on" => Self::Active,
            "paused" | "off" => Self::Paused,
            "archived" => Self::Archived,
            "deleted" => Self::Deleted,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Metric
// ---------------------------------------------------------------------------

/// A metric a condition can reference.
///
/// Names outside the known set are kept as [`Metric::Custom`] and resolved
/// through the row's extra-metric bag, falling back to `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Metric {
    Spend,
    Results,
    Impressions,
    Clicks,
    /// Click-through rate in percent.
    Ctr,
    /// Cost per click.
    Cpc,
    /// Cost per thousand impressions.
    Cpm,
    CostPerResult,
    /// The entity's current budget.
    Budget,
    Custom(String),
}

impl Metric {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Spend => "spend",
            Self::Results => "results",
            Self::Impressions => "impressions",
            Self::Clicks => "clicks",
            Self::Ctr => "ctr",
            Self::Cpc => "cpc",
            Self::Cpm => "cpm",
            Self::CostPerResult => "cost_per_result",
            Self::Budget => "budget",
            Self::Custom(name) => name.as_str(),
        }
    }
}

impl From<String> for Metric {
    fn from(value: String) -> Self {
        match value.as_str() {
            "spend" => Self::Spend,
            "results" => Self::Results,
            "impressions" => Self::Impressions,
            "clicks" => Self::Clicks,
            "ctr" => Self::Ctr,
            "cpc" => Self::Cpc,
            "cpm" => Self::Cpm,
            "cost_per_result" => Self::CostPerResult,
            "budget" => Self::Budget,
            _ => Self::Custom(value),
        }
    }
}

impl From<Metric> for String {
    fn from(value: Metric) -> Self {
        match value {
            Metric::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MetricsRow
// ---------------------------------------------------------------------------

/// One entity's performance snapshot for the evaluated time range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub name: String,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub results: f64,
    /// `None` for ads and for ad sets budgeted at campaign level.
    pub current_budget: Option<f64>,
    pub status: EntityStatus,
    /// Labels currently assigned to the entity.
    #[serde(default)]
    pub label_ids: Vec<String>,
    /// Provider-specific metrics not modelled as fields.
    #[serde(default)]
    pub extra_metrics: BTreeMap<String, f64>,
}

impl MetricsRow {
    /// Resolve a metric to a number. Missing values and zero denominators
    /// resolve to `0`.
    pub fn metric_value(&self, metric: &Metric) -> f64 {
        let impressions = self.impressions as f64;
        let clicks = self.clicks as f64;
        match metric {
            Metric::Spend => self.spend,
            Metric::Results => self.results,
            Metric::Impressions => impressions,
            Metric::Clicks => clicks,
            Metric::Ctr => ratio(clicks * 100.0, impressions),
            Metric::Cpc => ratio(self.spend, clicks),
            Metric::Cpm => ratio(self.spend * 1000.0, impressions),
            Metric::CostPerResult => ratio(self.spend, self.results),
            Metric::Budget => self.current_budget.unwrap_or(0.0),
            Metric::Custom(name) => self.extra_metrics.get(name).copied().unwrap_or(0.0),
        }
    }

    /// The mutable part of the snapshot that actions operate on.
    pub fn state(&self) -> EntityState {
        EntityState {
            status: self.status,
            current_budget: self.current_budget,
            label_ids: self.label_ids.clone(),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

// ---------------------------------------------------------------------------
// EntityState
// ---------------------------------------------------------------------------

/// Entity state as last seen by a run: from the snapshot, then replaced by
/// whatever the action gateway reports after each successful call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub status: EntityStatus,
    pub current_budget: Option<f64>,
    #[serde(default)]
    pub label_ids: Vec<String>,
}

impl EntityState {
    pub fn has_all_labels(&self, label_ids: &[String]) -> bool {
        label_ids.iter().all(|id| self.label_ids.contains(id))
    }
}


#[cfg(test)]
mod tests {
    use super::test_rows::campaign;
    use super::*;

    // -----------------------------------------------------------------------
    // Metric parsing
    // -----------------------------------------------------------------------

    #[test]
    fn known_metric_names_parse_to_variants() {
        assert_eq!(Metric::from("spend".to_string()), Metric::Spend);
        assert_eq!(
            Metric::from("cost_per_result".to_string()),
            Metric::CostPerResult
        );
    }

    #[test]
    fn unknown_metric_name_is_kept() {
        let metric = Metric::from("roas".to_string());
        assert_eq!(metric, Metric::Custom("roas".to_string()));
        assert_eq!(String::from(metric), "roas");
    }

    #[test]
    fn metric_serializes_as_plain_string() {
        let json = serde_json::to_value(Metric::Ctr).unwrap();
        assert_eq!(json, serde_json::json!("ctr"));
    }

    // -----------------------------------------------------------------------
    // Derived values
    // -----------------------------------------------------------------------

    #[test]
    fn derived_ratios() {
        let row = campaign("c1", 3000.0);
        assert_eq!(row.metric_value(&Metric::Ctr), 1.5);
        assert_eq!(row.metric_value(&Metric::Cpc), 20.0);
        assert_eq!(row.metric_value(&Metric::Cpm), 300.0);
        assert_eq!(row.metric_value(&Metric::CostPerResult), 250.0);
    }

    #[test]
    fn zero_denominators_yield_zero() {
        let mut row = campaign("c1", 500.0);
        row.impressions = 0;
        row.clicks = 0;
        row.results = 0.0;
        assert_eq!(row.metric_value(&Metric::Ctr), 0.0);
        assert_eq!(row.metric_value(&Metric::Cpc), 0.0);
        assert_eq!(row.metric_value(&Metric::CostPerResult), 0.0);
    }

    #[test]
    fn missing_custom_metric_is_zero() {
        let mut row = campaign("c1", 0.0);
        assert_eq!(row.metric_value(&Metric::Custom("roas".into())), 0.0);
        row.extra_metrics.insert("roas".into(), 2.5);
        assert_eq!(row.metric_value(&Metric::Custom("roas".into())), 2.5);
    }

    #[test]
    fn missing_budget_is_zero() {
        let mut row = campaign("c1", 0.0);
        row.current_budget = None;
        assert_eq!(row.metric_value(&Metric::Budget), 0.0);
    }

    // -----------------------------------------------------------------------
    // Status / scope parsing
    // -----------------------------------------------------------------------

    #[test]
    fn lenient_status_parse() {
        assert_eq!(EntityStatus::parse_lenient("ACTIVE"), EntityStatus::Active);
        assert_eq!(EntityStatus::parse_lenient("PAUSED"), EntityStatus::Paused);
        assert_eq!(
            EntityStatus::parse_lenient("IN_PROCESS"),
            EntityStatus::Unknown
        );
    }

    #[test]
    fn invalid_scope_is_rejected() {
        assert!(EntityType::from_str("account").is_err());
        assert_eq!(EntityType::from_str("adset").unwrap(), EntityType::Adset);
    }

    #[test]
    fn only_ads_lack_budgets() {
        assert!(EntityType::Campaign.carries_budget());
        assert!(EntityType::Adset.carries_budget());
        assert!(!EntityType::Ad.carries_budget());
    }
}
