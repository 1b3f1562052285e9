//! Condition evaluation against a single metrics row.
//!
//! Pure functions only: the same condition and row always produce the same
//! answer.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::metrics::MetricsRow;
use crate::rule::{Condition, ConditionLogic, Operator};

/// Evaluate one condition against one row.
///
/// A metric the row does not carry resolves to `0` and is compared as such.
pub fn evaluate(condition: &Condition, row: &MetricsRow) -> bool {
    let observed = row.metric_value(&condition.metric);
    condition.operator.compare(observed, condition.value)
}

/// Evaluate a condition list with AND (`all`) or OR (`any`) logic.
///
/// Both forms short-circuit. An empty list is an error rather than a
/// vacuous result.
pub fn evaluate_all(
    conditions: &[Condition],
    logic: ConditionLogic,
    row: &MetricsRow,
) -> Result<bool, CoreError> {
    if conditions.is_empty() {
        return Err(CoreError::Validation(
            "Cannot evaluate an empty condition list".to_string(),
        ));
    }
    let matched = match logic {
        ConditionLogic::All => conditions.iter().all(|c| evaluate(c, row)),
        ConditionLogic::Any => conditions.iter().any(|c| evaluate(c, row)),
    };
    Ok(matched)
}

// ---------------------------------------------------------------------------
// Match reasons
// ---------------------------------------------------------------------------

/// The observed side of one condition, kept so callers can show why an
/// entity matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionCheck {
    pub metric: String,
    pub operator: Operator,
    pub threshold: f64,
    pub observed: f64,
    pub passed: bool,
}

impl std::fmt::Display for ConditionCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}={} {} {}",
            self.metric,
            self.observed,
            self.operator.symbol(),
            self.threshold
        )
    }
}

/// Record the observed value for every condition, without short-circuiting.
pub fn explain(conditions: &[Condition], row: &MetricsRow) -> Vec<ConditionCheck> {
    conditions
        .iter()
        .map(|c| {
            let observed = row.metric_value(&c.metric);
            ConditionCheck {
                metric: c.metric.to_string(),
                operator: c.operator,
                threshold: c.value,
                observed,
                passed: c.operator.compare(observed, c.value),
            }
        })
        .collect()
}
