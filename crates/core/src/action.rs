//! Action resolution and budget arithmetic.
//!
//! Turns a configured [`RuleAction`] plus the entity's current state into the
//! concrete [`ResolvedAction`] sent to the action gateway. Budget deltas are
//! always computed from the live budget, never from ledger history.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::metrics::EntityState;
use crate::rule::{ActionType, BudgetMode, RuleAction};

// ---------------------------------------------------------------------------
// CurrencyPolicy
// ---------------------------------------------------------------------------

/// Rounding and floor rules for budgets in one account currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPolicy {
    /// ISO 4217 code, e.g. `"KRW"`.
    pub code: String,
    /// Number of decimal places the platform accepts (0 for currencies
    /// without a sub-unit).
    pub decimals: u32,
    /// Smallest daily budget the platform accepts.
    pub min_budget: f64,
}

impl CurrencyPolicy {
    /// Defaults for a currency code. Unknown codes get two decimals and a
    /// floor of one major unit.
    pub fn for_code(code: &str) -> Self {
        let code = code.trim().to_ascii_uppercase();
        let (decimals, min_budget) = match code.as_str() {
            "KRW" => (0, 1_000.0),
            "JPY" => (0, 100.0),
            "VND" => (0, 20_000.0),
            "IDR" => (0, 10_000.0),
            "CLP" | "COP" | "HUF" | "ISK" | "PYG" | "TWD" => (0, 100.0),
            _ => (2, 1.0),
        };
        Self {
            code,
            decimals,
            min_budget,
        }
    }

    pub fn with_min_budget(mut self, min_budget: f64) -> Self {
        self.min_budget = min_budget;
        self
    }

    /// Round half away from zero to the currency's smallest unit.
    pub fn round(&self, amount: f64) -> f64 {
        let scale = 10f64.powi(self.decimals as i32);
        (amount * scale).round() / scale
    }
}

/// Compute the budget an action should set.
///
/// Percentage mode scales `current` by `1 ± value/100`; fixed mode sets
/// `value` directly. A result below the platform floor is an error, not a
/// clamped success.
pub fn compute_new_budget(
    action_type: ActionType,
    mode: BudgetMode,
    value: f64,
    current: f64,
    policy: &CurrencyPolicy,
) -> Result<f64, CoreError> {
    let raw = match (mode, action_type) {
        (BudgetMode::Fixed, _) => value,
        (BudgetMode::Percentage, ActionType::IncreaseBudget) => current * (1.0 + value / 100.0),
        (BudgetMode::Percentage, ActionType::DecreaseBudget) => current * (1.0 - value / 100.0),
        (BudgetMode::Percentage, other) => {
            return Err(CoreError::Validation(format!(
                "{other} is not a budget action"
            )))
        }
    };
    let rounded = policy.round(raw);
    if rounded < policy.min_budget {
        return Err(CoreError::Validation(format!(
            "Budget {rounded} {} is below the platform minimum of {} {}",
            policy.code, policy.min_budget, policy.code
        )));
    }
    Ok(rounded)
}

// ---------------------------------------------------------------------------
// ResolvedAction
// ---------------------------------------------------------------------------

/// A fully-determined mutation for the action gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolvedAction {
    TurnOn,
    TurnOff,
    SetBudget { from: f64, to: f64 },
    AddLabels { label_ids: Vec<String> },
}

impl ResolvedAction {
    pub fn budget_change(&self) -> Option<(f64, f64)> {
        match self {
            Self::SetBudget { from, to } => Some((*from, *to)),
            _ => None,
        }
    }
}

/// Resolve a configured action against the entity's current state.
///
/// Fails for budget actions on entities without a budget and for budgets
/// that would fall below the currency floor.
pub fn resolve_action(
    action: &RuleAction,
    rule_labels: &[String],
    state: &EntityState,
    policy: &CurrencyPolicy,
) -> Result<ResolvedAction, CoreError> {
    match action.action_type {
        ActionType::TurnOn => Ok(ResolvedAction::TurnOn),
        ActionType::TurnOff => Ok(ResolvedAction::TurnOff),
        ActionType::AssignLabel => {
            let label_ids = action.effective_labels(rule_labels).to_vec();
            if label_ids.is_empty() {
                return Err(CoreError::Validation(
                    "assign_label has no target labels".to_string(),
                ));
            }
            Ok(ResolvedAction::AddLabels { label_ids })
        }
        kind @ (ActionType::IncreaseBudget | ActionType::DecreaseBudget) => {
            let current = state.current_budget.ok_or_else(|| {
                CoreError::Validation(format!(
                    "{kind} needs an entity-level budget but none is set"
                ))
            })?;
            let (mode, value) = match (action.budget_mode, action.value) {
                (Some(mode), Some(value)) => (mode, value),
                _ => {
                    return Err(CoreError::Validation(format!(
                        "{kind} requires budget_mode and value"
                    )))
                }
            };
            let to = compute_new_budget(kind, mode, value, current, policy)?;
            Ok(ResolvedAction::SetBudget { from: current, to })
        }
    }
}
