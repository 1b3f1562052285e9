//! Match planning: which snapshot rows a rule applies to, and why.
//!
//! The planner evaluates a rule's entry stage against every candidate row.
//! An empty snapshot is reported as [`MatchPlan::NoData`] so callers can tell
//! "nothing synced yet" apart from "ran and matched nothing".

use serde::{Deserialize, Serialize};

use crate::action::{resolve_action, CurrencyPolicy, ResolvedAction};
use crate::condition::{evaluate_all, explain, ConditionCheck};
use crate::error::CoreError;
use crate::metrics::MetricsRow;
use crate::rule::{ActionType, AutomationRule, Stage};

// ---------------------------------------------------------------------------
// LabelFilter
// ---------------------------------------------------------------------------

/// Restricts candidates to entities carrying at least one of the labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelFilter {
    pub label_ids: Vec<String>,
}

impl LabelFilter {
    pub fn new(label_ids: Vec<String>) -> Self {
        Self { label_ids }
    }

    /// An empty filter admits every row.
    pub fn admits(&self, row: &MetricsRow) -> bool {
        self.label_ids.is_empty() || self.label_ids.iter().any(|l| row.label_ids.contains(l))
    }
}

// ---------------------------------------------------------------------------
// MatchPlan
// ---------------------------------------------------------------------------

/// A row that satisfied the entry stage, with the observed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedEntity {
    pub row: MetricsRow,
    pub reasons: Vec<ConditionCheck>,
}

impl MatchedEntity {
    /// Human-readable reasons, e.g. `spend=150000 >= 0`.
    pub fn reason_lines(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }
}

/// Result of planning a rule against a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchPlan {
    /// The provider returned no rows at all for the scope and time range.
    NoData,
    /// Rows were available; `matched` keeps the provider's order.
    Evaluated {
        candidate_count: usize,
        matched: Vec<MatchedEntity>,
    },
}

impl MatchPlan {
    pub fn matched(&self) -> &[MatchedEntity] {
        match self {
            Self::NoData => &[],
            Self::Evaluated { matched, .. } => matched,
        }
    }

    pub fn into_matched(self) -> Vec<MatchedEntity> {
        match self {
            Self::NoData => Vec::new(),
            Self::Evaluated { matched, .. } => matched,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }
}

/// Select the rows a rule matches.
///
/// Rows of a different entity type than the rule's scope are not
/// candidates. `filter` narrows candidates further by label.
pub fn plan_matches(
    rule: &AutomationRule,
    rows: &[MetricsRow],
    filter: Option<&LabelFilter>,
) -> Result<MatchPlan, CoreError> {
    if rows.is_empty() {
        return Ok(MatchPlan::NoData);
    }

    let stage = rule.body.entry_stage().ok_or_else(|| {
        CoreError::Validation(format!("Rule {} has no stages to evaluate", rule.id))
    })?;

    let mut candidate_count = 0;
    let mut matched = Vec::new();
    for row in rows {
        if row.entity_type != rule.scope {
            continue;
        }
        if filter.is_some_and(|f| !f.admits(row)) {
            continue;
        }
        candidate_count += 1;
        if evaluate_all(&stage.conditions, stage.condition_logic, row)? {
            matched.push(MatchedEntity {
                row: row.clone(),
                reasons: explain(&stage.conditions, row),
            });
        }
    }

    Ok(MatchPlan::Evaluated {
        candidate_count,
        matched,
    })
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

/// What an action would do to one entity, computed without side effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action: ActionType,
    pub resolved: Option<ResolvedAction>,
    /// Why the action could not be resolved (e.g. budget below the floor).
    pub error: Option<String>,
}

/// A matched entity together with the entry stage's planned actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPreview {
    pub entity_id: String,
    pub entity_name: String,
    pub reasons: Vec<String>,
    pub planned_actions: Vec<PlannedAction>,
}

/// Plan the entry stage's actions for every matched entity.
///
/// Later stages of a chain depend on earlier side effects and are not
/// previewed.
pub fn preview(
    matched: &[MatchedEntity],
    stage: &Stage,
    rule_labels: &[String],
    policy: &CurrencyPolicy,
) -> Vec<EntityPreview> {
    matched
        .iter()
        .map(|m| {
            let state = m.row.state();
            let planned_actions = stage
                .actions
                .iter()
                .map(|a| match resolve_action(a, rule_labels, &state, policy) {
                    Ok(resolved) => PlannedAction {
                        action: a.action_type,
                        resolved: Some(resolved),
                        error: None,
                    },
                    Err(e) => PlannedAction {
                        action: a.action_type,
                        resolved: None,
                        error: Some(e.to_string()),
                    },
                })
                .collect();
            EntityPreview {
                entity_id: m.row.entity_id.clone(),
                entity_name: m.row.name.clone(),
                reasons: m.reason_lines(),
                planned_actions,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_rows::campaign;
    use crate::metrics::{EntityType, Metric};
    use crate::rule::test_rules::{rule, simple_stage, spend_gte};
    use crate::rule::{BudgetMode, Condition, Operator, RuleAction, RuleBody};

    fn turn_off_rule(threshold: f64) -> AutomationRule {
        rule(
            1,
            EntityType::Campaign,
            RuleBody::Simple(simple_stage(
                vec![spend_gte(threshold)],
                vec![RuleAction::new(ActionType::TurnOff)],
            )),
        )
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    #[test]
    fn empty_snapshot_is_no_data() {
        let plan = plan_matches(&turn_off_rule(0.0), &[], None).unwrap();
        assert!(plan.is_no_data());
        assert!(plan.matched().is_empty());
    }

    #[test]
    fn nothing_matched_is_not_no_data() {
        let rows = vec![campaign("c1", 10.0)];
        let plan = plan_matches(&turn_off_rule(1_000.0), &rows, None).unwrap();
        assert_eq!(
            plan,
            MatchPlan::Evaluated {
                candidate_count: 1,
                matched: vec![]
            }
        );
    }

    #[test]
    fn spend_gte_zero_matches_everything_in_order() {
        let rows = vec![
            campaign("c3", 0.0),
            campaign("c1", 1_000.0),
            campaign("c2", 5.0),
        ];
        let plan = plan_matches(&turn_off_rule(0.0), &rows, None).unwrap();
        let ids: Vec<_> = plan
            .matched()
            .iter()
            .map(|m| m.row.entity_id.as_str())
            .collect();
        assert_eq!(ids, ["c3", "c1", "c2"]);
    }

    #[test]
    fn rows_of_other_scopes_are_ignored() {
        let mut ad_row = campaign("a1", 1_000.0);
        ad_row.entity_type = EntityType::Ad;
        let rows = vec![ad_row, campaign("c1", 1_000.0)];
        let plan = plan_matches(&turn_off_rule(0.0), &rows, None).unwrap();
        assert_eq!(plan.matched().len(), 1);
        assert_eq!(plan.matched()[0].row.entity_id, "c1");
    }

    #[test]
    fn label_filter_restricts_candidates() {
        let mut labelled = campaign("c1", 1_000.0);
        labelled.label_ids = vec!["promo".to_string()];
        let rows = vec![labelled, campaign("c2", 1_000.0)];
        let filter = LabelFilter::new(vec!["promo".to_string()]);
        let plan = plan_matches(&turn_off_rule(0.0), &rows, Some(&filter)).unwrap();
        assert_eq!(
            plan.matched()
                .iter()
                .map(|m| m.row.entity_id.clone())
                .collect::<Vec<_>>(),
            vec!["c1".to_string()]
        );
    }

    #[test]
    fn match_reasons_are_recorded() {
        let rows = vec![campaign("c1", 150_000.0)];
        let plan = plan_matches(&turn_off_rule(0.0), &rows, None).unwrap();
        assert_eq!(plan.matched()[0].reason_lines(), ["spend=150000 >= 0"]);
    }

    #[test]
    fn chained_rule_matches_on_first_step() {
        let body = RuleBody::Chained {
            steps: vec![
                simple_stage(
                    vec![Condition {
                        metric: Metric::Spend,
                        operator: Operator::Gt,
                        value: 100.0,
                    }],
                    vec![RuleAction::new(ActionType::TurnOff)],
                ),
                simple_stage(
                    vec![spend_gte(1_000_000.0)],
                    vec![RuleAction::new(ActionType::TurnOff)],
                ),
            ],
        };
        let rows = vec![campaign("c1", 500.0), campaign("c2", 50.0)];
        let plan = plan_matches(&rule(1, EntityType::Campaign, body), &rows, None).unwrap();
        assert_eq!(plan.matched().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Preview
    // -----------------------------------------------------------------------

    #[test]
    fn preview_reports_target_budget_and_floor_errors() {
        let stage = simple_stage(
            vec![spend_gte(0.0)],
            vec![RuleAction::budget(
                ActionType::DecreaseBudget,
                50.0,
                BudgetMode::Percentage,
            )],
        );
        let rule = rule(1, EntityType::Campaign, RuleBody::Simple(stage.clone()));
        let mut small = campaign("c2", 10.0);
        small.current_budget = Some(1_500.0);
        let rows = vec![campaign("c1", 10.0), small];
        let plan = plan_matches(&rule, &rows, None).unwrap();

        let previews = preview(
            plan.matched(),
            &stage,
            &[],
            &CurrencyPolicy::for_code("KRW"),
        );
        assert_eq!(previews.len(), 2);
        assert_eq!(
            previews[0].planned_actions[0].resolved,
            Some(ResolvedAction::SetBudget {
                from: 100_000.0,
                to: 50_000.0
            })
        );
        assert!(previews[1].planned_actions[0].error.is_some());
    }
}
