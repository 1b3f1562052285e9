//! Automation rule model and save-time validation.
//!
//! A rule is either a single condition/action stage or a chain of stages
//! ([`RuleBody`]). Validation runs when a rule is saved so malformed
//! definitions never reach the execution engine.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::metrics::{EntityType, Metric};
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of a rule name.
pub const MAX_RULE_NAME_LENGTH: usize = 200;

/// Maximum number of conditions in a single stage.
pub const MAX_CONDITIONS_PER_STAGE: usize = 20;

/// Maximum number of actions in a single stage.
pub const MAX_ACTIONS_PER_STAGE: usize = 10;

/// Maximum number of stages in a step chain.
pub const MAX_STEPS: usize = 10;

// ---------------------------------------------------------------------------
// TimeRange
// ---------------------------------------------------------------------------

/// Metrics window a rule is evaluated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    Today,
    Yesterday,
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_14_days")]
    Last14Days,
    #[serde(rename = "last_30_days")]
    Last30Days,
    Lifetime,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::Last7Days => "last_7_days",
            Self::Last14Days => "last_14_days",
            Self::Last30Days => "last_30_days",
            Self::Lifetime => "lifetime",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "today" => Ok(Self::Today),
            "yesterday" => Ok(Self::Yesterday),
            "last_7_days" => Ok(Self::Last7Days),
            "last_14_days" => Ok(Self::Last14Days),
            "last_30_days" => Ok(Self::Last30Days),
            "lifetime" => Ok(Self::Lifetime),
            _ => Err(CoreError::Validation(format!(
                "Invalid time_range: '{s}'. Must be one of: today, yesterday, \
                 last_7_days, last_14_days, last_30_days, lifetime"
            ))),
        }
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ConditionLogic
// ---------------------------------------------------------------------------

/// How a stage's conditions combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    /// Every condition must hold (AND).
    #[default]
    All,
    /// At least one condition must hold (OR).
    Any,
}

impl ConditionLogic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            _ => Err(CoreError::Validation(format!(
                "Invalid condition_logic: '{s}'. Must be one of: all, any"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Operator / Condition
// ---------------------------------------------------------------------------

/// Absolute tolerance used by `eq` / `neq` on floating point metrics.
pub const EQ_TOLERANCE: f64 = 1e-9;

/// Comparison operator for a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    Neq,
}

impl Operator {
    /// Compare an observed value against a threshold.
    pub fn compare(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => observed > threshold,
            Self::Lt => observed < threshold,
            Self::Gte => observed >= threshold,
            Self::Lte => observed <= threshold,
            Self::Eq => (observed - threshold).abs() <= EQ_TOLERANCE,
            Self::Neq => (observed - threshold).abs() > EQ_TOLERANCE,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "=",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Neq => "!=",
        }
    }
}

/// A single `{metric, operator, value}` comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub metric: Metric,
    pub operator: Operator,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Side effect applied to a matched entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    TurnOn,
    TurnOff,
    IncreaseBudget,
    DecreaseBudget,
    AssignLabel,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
            Self::IncreaseBudget => "increase_budget",
            Self::DecreaseBudget => "decrease_budget",
            Self::AssignLabel => "assign_label",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "turn_on" => Ok(Self::TurnOn),
            "turn_off" => Ok(Self::TurnOff),
            "increase_budget" => Ok(Self::IncreaseBudget),
            "decrease_budget" => Ok(Self::DecreaseBudget),
            "assign_label" => Ok(Self::AssignLabel),
            _ => Err(CoreError::Validation(format!(
                "Invalid action type: '{s}'. Must be one of: turn_on, turn_off, \
                 increase_budget, decrease_budget, assign_label"
            ))),
        }
    }

    pub fn is_budget_change(&self) -> bool {
        matches!(self, Self::IncreaseBudget | Self::DecreaseBudget)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a budget action's `value` is a percentage delta or an absolute amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    Percentage,
    Fixed,
}

/// One configured action of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub budget_mode: Option<BudgetMode>,
    /// Labels for `assign_label`; falls back to the rule's target labels.
    #[serde(default)]
    pub target_label_ids: Vec<String>,
}

impl RuleAction {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            value: None,
            budget_mode: None,
            target_label_ids: Vec::new(),
        }
    }

    pub fn budget(action_type: ActionType, value: f64, mode: BudgetMode) -> Self {
        Self {
            action_type,
            value: Some(value),
            budget_mode: Some(mode),
            target_label_ids: Vec::new(),
        }
    }

    /// Labels this action assigns, resolving the rule-level fallback.
    pub fn effective_labels<'a>(&'a self, rule_labels: &'a [String]) -> &'a [String] {
        if self.target_label_ids.is_empty() {
            rule_labels
        } else {
            &self.target_label_ids
        }
    }
}

// ---------------------------------------------------------------------------
// Stage / RuleBody
// ---------------------------------------------------------------------------

/// A condition→action block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    pub actions: Vec<RuleAction>,
}

/// The executable part of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleBody {
    /// One stage: match on its conditions, apply its actions.
    Simple(Stage),
    /// Ordered stages; each only runs if the previous one matched.
    Chained { steps: Vec<Stage> },
}

impl RuleBody {
    /// The stage whose conditions decide whether an entity matches at all.
    pub fn entry_stage(&self) -> Option<&Stage> {
        match self {
            Self::Simple(stage) => Some(stage),
            Self::Chained { steps } => steps.first(),
        }
    }

    /// Every stage in evaluation order.
    pub fn stages(&self) -> &[Stage] {
        match self {
            Self::Simple(stage) => std::slice::from_ref(stage),
            Self::Chained { steps } => steps,
        }
    }

    pub fn has_budget_action(&self) -> bool {
        self.stages()
            .iter()
            .flat_map(|s| s.actions.iter())
            .any(|a| a.action_type.is_budget_change())
    }
}

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

/// Observable run state of a rule, persisted for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Pending,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "idle" => Ok(Self::Idle),
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::Validation(format!(
                "Invalid execution_status: '{s}'"
            ))),
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RuleDefinition / AutomationRule
// ---------------------------------------------------------------------------

/// The user-editable part of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    pub scope: EntityType,
    pub time_range: TimeRange,
    pub body: RuleBody,
    #[serde(default)]
    pub target_label_ids: Vec<String>,
}

impl RuleDefinition {
    /// Reject definitions the engine must never see at execution time.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_rule_name(&self.name)?;
        match &self.body {
            RuleBody::Simple(stage) => validate_stage(stage, None)?,
            RuleBody::Chained { steps } => {
                if steps.is_empty() {
                    return Err(CoreError::Validation(
                        "A chained rule must have at least one step".to_string(),
                    ));
                }
                if steps.len() > MAX_STEPS {
                    return Err(CoreError::Validation(format!(
                        "A chained rule may have at most {MAX_STEPS} steps"
                    )));
                }
                for (index, stage) in steps.iter().enumerate() {
                    validate_stage(stage, Some(index + 1))?;
                }
            }
        }
        for stage in self.body.stages() {
            for action in &stage.actions {
                validate_action(action, self.scope, &self.target_label_ids)?;
            }
        }
        Ok(())
    }
}

/// A persisted rule with its observable run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: DbId,
    pub owner_id: DbId,
    pub name: String,
    pub scope: EntityType,
    pub time_range: TimeRange,
    pub body: RuleBody,
    pub target_label_ids: Vec<String>,
    pub is_active: bool,
    pub execution_status: ExecutionStatus,
    pub last_run_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a rule name: non-empty and within the length limit.
pub fn validate_rule_name(name: &str) -> Result<(), CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(
            "Rule name must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_RULE_NAME_LENGTH {
        return Err(CoreError::Validation(format!(
            "Rule name exceeds maximum length of {MAX_RULE_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

fn stage_label(step: Option<usize>) -> String {
    match step {
        Some(n) => format!("Step {n}"),
        None => "Rule".to_string(),
    }
}

fn validate_stage(stage: &Stage, step: Option<usize>) -> Result<(), CoreError> {
    let label = stage_label(step);
    if stage.conditions.is_empty() {
        return Err(CoreError::Validation(format!(
            "{label} must have at least one condition"
        )));
    }
    if stage.conditions.len() > MAX_CONDITIONS_PER_STAGE {
        return Err(CoreError::Validation(format!(
            "{label} may have at most {MAX_CONDITIONS_PER_STAGE} conditions"
        )));
    }
    if stage.actions.is_empty() {
        return Err(CoreError::Validation(format!(
            "{label} must have at least one action"
        )));
    }
    if stage.actions.len() > MAX_ACTIONS_PER_STAGE {
        return Err(CoreError::Validation(format!(
            "{label} may have at most {MAX_ACTIONS_PER_STAGE} actions"
        )));
    }
    for condition in &stage.conditions {
        if condition.metric.as_str().trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "{label} has a condition without a metric"
            )));
        }
        if !condition.value.is_finite() {
            return Err(CoreError::Validation(format!(
                "{label} condition on '{}' must have a finite value",
                condition.metric
            )));
        }
    }
    Ok(())
}

fn validate_action(
    action: &RuleAction,
    scope: EntityType,
    rule_labels: &[String],
) -> Result<(), CoreError> {
    let kind = action.action_type;
    if kind.is_budget_change() {
        if !scope.carries_budget() {
            return Err(CoreError::Validation(format!(
                "{kind} is not allowed on ad-scope rules; budgets live on campaigns and ad sets"
            )));
        }
        let mode = action.budget_mode.ok_or_else(|| {
            CoreError::Validation(format!("{kind} requires budget_mode (percentage or fixed)"))
        })?;
        let value = match action.value {
            Some(v) if v.is_finite() && v > 0.0 => v,
            _ => {
                return Err(CoreError::Validation(format!(
                    "{kind} requires a value greater than 0"
                )))
            }
        };
        if kind == ActionType::DecreaseBudget && mode == BudgetMode::Percentage && value >= 100.0
        {
            return Err(CoreError::Validation(
                "decrease_budget percentage must be below 100".to_string(),
            ));
        }
    }
    if kind == ActionType::AssignLabel && action.effective_labels(rule_labels).is_empty() {
        return Err(CoreError::Validation(
            "assign_label requires at least one target label".to_string(),
        ));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_rules::*;
    use super::*;

    fn turn_off_body() -> RuleBody {
        RuleBody::Simple(simple_stage(
            vec![spend_gte(0.0)],
            vec![RuleAction::new(ActionType::TurnOff)],
        ))
    }

    // -----------------------------------------------------------------------
    // Accepted definitions
    // -----------------------------------------------------------------------

    #[test]
    fn simple_turn_off_rule_is_valid() {
        assert!(definition(EntityType::Campaign, turn_off_body())
            .validate()
            .is_ok());
    }

    #[test]
    fn percentage_budget_on_adset_is_valid() {
        let body = RuleBody::Simple(simple_stage(
            vec![spend_gte(1000.0)],
            vec![RuleAction::budget(
                ActionType::IncreaseBudget,
                10.0,
                BudgetMode::Percentage,
            )],
        ));
        assert!(definition(EntityType::Adset, body).validate().is_ok());
    }

    #[test]
    fn assign_label_falls_back_to_rule_labels() {
        let body = RuleBody::Simple(simple_stage(
            vec![spend_gte(0.0)],
            vec![RuleAction::new(ActionType::AssignLabel)],
        ));
        let mut def = definition(EntityType::Ad, body);
        def.target_label_ids = vec!["lbl-1".to_string()];
        assert!(def.validate().is_ok());
    }

    // -----------------------------------------------------------------------
    // Rejected definitions
    // -----------------------------------------------------------------------

    #[test]
    fn empty_conditions_rejected() {
        let body = RuleBody::Simple(simple_stage(
            vec![],
            vec![RuleAction::new(ActionType::TurnOff)],
        ));
        let err = definition(EntityType::Campaign, body)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("at least one condition"));
    }

    #[test]
    fn empty_actions_rejected() {
        let body = RuleBody::Simple(simple_stage(vec![spend_gte(0.0)], vec![]));
        assert!(definition(EntityType::Campaign, body).validate().is_err());
    }

    #[test]
    fn budget_action_on_ad_scope_rejected() {
        let body = RuleBody::Simple(simple_stage(
            vec![spend_gte(0.0)],
            vec![RuleAction::budget(
                ActionType::DecreaseBudget,
                10.0,
                BudgetMode::Percentage,
            )],
        ));
        let err = definition(EntityType::Ad, body).validate().unwrap_err();
        assert!(err.to_string().contains("ad-scope"));
    }

    #[test]
    fn budget_action_without_mode_rejected() {
        let mut action = RuleAction::new(ActionType::IncreaseBudget);
        action.value = Some(10.0);
        let body = RuleBody::Simple(simple_stage(vec![spend_gte(0.0)], vec![action]));
        let err = definition(EntityType::Campaign, body)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("budget_mode"));
    }

    #[test]
    fn budget_action_with_zero_value_rejected() {
        let body = RuleBody::Simple(simple_stage(
            vec![spend_gte(0.0)],
            vec![RuleAction::budget(
                ActionType::IncreaseBudget,
                0.0,
                BudgetMode::Fixed,
            )],
        ));
        assert!(definition(EntityType::Campaign, body).validate().is_err());
    }

    #[test]
    fn full_percentage_decrease_rejected() {
        let body = RuleBody::Simple(simple_stage(
            vec![spend_gte(0.0)],
            vec![RuleAction::budget(
                ActionType::DecreaseBudget,
                100.0,
                BudgetMode::Percentage,
            )],
        ));
        assert!(definition(EntityType::Campaign, body).validate().is_err());
    }

    #[test]
    fn assign_label_without_any_labels_rejected() {
        let body = RuleBody::Simple(simple_stage(
            vec![spend_gte(0.0)],
            vec![RuleAction::new(ActionType::AssignLabel)],
        ));
        assert!(definition(EntityType::Campaign, body).validate().is_err());
    }

    #[test]
    fn empty_chain_rejected() {
        let body = RuleBody::Chained { steps: vec![] };
        assert!(definition(EntityType::Campaign, body).validate().is_err());
    }

    #[test]
    fn invalid_step_is_reported_by_number() {
        let body = RuleBody::Chained {
            steps: vec![
                simple_stage(
                    vec![spend_gte(100.0)],
                    vec![RuleAction::new(ActionType::TurnOff)],
                ),
                simple_stage(vec![], vec![RuleAction::new(ActionType::TurnOff)]),
            ],
        };
        let err = definition(EntityType::Campaign, body)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("Step 2"));
    }

    #[test]
    fn blank_name_rejected() {
        let mut def = definition(EntityType::Campaign, turn_off_body());
        def.name = "   ".to_string();
        assert!(def.validate().is_err());
    }

    #[test]
    fn non_finite_threshold_rejected() {
        let body = RuleBody::Simple(simple_stage(
            vec![spend_gte(f64::NAN)],
            vec![RuleAction::new(ActionType::TurnOff)],
        ));
        assert!(definition(EntityType::Campaign, body).validate().is_err());
    }

    // -----------------------------------------------------------------------
    // Serialization shape
    // -----------------------------------------------------------------------

    #[test]
    fn simple_body_serializes_with_kind_tag() {
        let json = serde_json::to_value(turn_off_body()).unwrap();
        assert_eq!(json["kind"], "simple");
        assert_eq!(json["conditions"][0]["metric"], "spend");
        assert_eq!(json["conditions"][0]["operator"], "gte");
        assert_eq!(json["actions"][0]["type"], "turn_off");
    }

    #[test]
    fn chained_body_round_trips_from_json() {
        let json = serde_json::json!({
            "kind": "chained",
            "steps": [
                {
                    "conditions": [{"metric": "spend", "operator": "gt", "value": 1000}],
                    "actions": [{"type": "assign_label", "target_label_ids": ["watch"]}]
                },
                {
                    "conditions": [{"metric": "spend", "operator": "gt", "value": 5000}],
                    "condition_logic": "any",
                    "actions": [{"type": "turn_off"}]
                }
            ]
        });
        let body: RuleBody = serde_json::from_value(json).unwrap();
        assert_eq!(body.stages().len(), 2);
        assert_eq!(body.stages()[1].condition_logic, ConditionLogic::Any);
        assert_eq!(body.stages()[0].condition_logic, ConditionLogic::All);
    }

    #[test]
    fn time_range_wire_names() {
        assert_eq!(
            serde_json::to_value(TimeRange::Last7Days).unwrap(),
            serde_json::json!("last_7_days")
        );
        assert_eq!(TimeRange::from_str("last_30_days").unwrap(), TimeRange::Last30Days);
        assert!(TimeRange::from_str("last_90_days").is_err());
    }
}
