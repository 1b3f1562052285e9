//! Automation rule row model and DTOs.
//!
//! A simple rule stores its single stage in `conditions` / `condition_logic` /
//! `actions` and leaves `steps` NULL. A chained rule stores every stage in
//! `steps` and leaves the flat columns empty.

use adpilot_core::error::CoreError;
use adpilot_core::metrics::EntityType;
use adpilot_core::rule::{
    AutomationRule, Condition, ConditionLogic, ExecutionStatus, RuleAction, RuleBody,
    RuleDefinition, Stage, TimeRange,
};
use adpilot_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `automation_rules` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AutomationRuleRow {
    pub id: DbId,
    pub owner_id: DbId,
    pub name: String,
    pub scope: String,
    pub time_range: String,
    pub condition_logic: String,
    pub conditions: serde_json::Value,
    pub actions: serde_json::Value,
    pub steps: Option<serde_json::Value>,
    pub target_label_ids: Vec<String>,
    pub is_active: bool,
    pub execution_status: String,
    pub last_run_at: Option<Timestamp>,
    pub last_run_started_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AutomationRuleRow {
    /// Decode the stored columns into the domain rule.
    ///
    /// Fails only if the row was written by something other than this crate.
    pub fn into_domain(self) -> Result<AutomationRule, CoreError> {
        let body = match self.steps {
            Some(steps) => RuleBody::Chained {
                steps: decode_json(steps, "steps")?,
            },
            None => RuleBody::Simple(Stage {
                conditions: decode_json(self.conditions, "conditions")?,
                condition_logic: ConditionLogic::from_str(&self.condition_logic)?,
                actions: decode_json(self.actions, "actions")?,
            }),
        };
        Ok(AutomationRule {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            scope: EntityType::from_str(&self.scope)?,
            time_range: TimeRange::from_str(&self.time_range)?,
            body,
            target_label_ids: self.target_label_ids,
            is_active: self.is_active,
            execution_status: ExecutionStatus::from_str(&self.execution_status)?,
            last_run_at: self.last_run_at,
            last_error: self.last_error,
        })
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    column: &str,
) -> Result<T, CoreError> {
    serde_json::from_value(value)
        .map_err(|e| CoreError::Internal(format!("Corrupt automation_rules.{column}: {e}")))
}

// ---------------------------------------------------------------------------
// Stored body columns
// ---------------------------------------------------------------------------

/// The column values a [`RuleBody`] is written as.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBody {
    pub condition_logic: &'static str,
    pub conditions: serde_json::Value,
    pub actions: serde_json::Value,
    pub steps: Option<serde_json::Value>,
}

impl StoredBody {
    pub fn from_body(body: &RuleBody) -> Result<Self, CoreError> {
        let encode = |v: serde_json::Result<serde_json::Value>| {
            v.map_err(|e| CoreError::Internal(format!("Failed to encode rule body: {e}")))
        };
        match body {
            RuleBody::Simple(stage) => Ok(Self {
                condition_logic: stage.condition_logic.as_str(),
                conditions: encode(serde_json::to_value(&stage.conditions))?,
                actions: encode(serde_json::to_value(&stage.actions))?,
                steps: None,
            }),
            RuleBody::Chained { steps } => Ok(Self {
                condition_logic: ConditionLogic::All.as_str(),
                conditions: serde_json::json!([]),
                actions: serde_json::json!([]),
                steps: Some(encode(serde_json::to_value(steps))?),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// The user-editable part of a rule as sent by clients.
///
/// Either the flat `conditions` / `actions` pair or `steps` must be given,
/// never both.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDefinitionInput {
    pub name: String,
    pub scope: String,
    pub time_range: String,
    pub condition_logic: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    pub steps: Option<Vec<Stage>>,
    #[serde(default)]
    pub target_label_ids: Vec<String>,
}

impl RuleDefinitionInput {
    /// Parse and validate into a [`RuleDefinition`].
    pub fn to_definition(&self) -> Result<RuleDefinition, CoreError> {
        let body = match &self.steps {
            Some(steps) => {
                if !self.conditions.is_empty() || !self.actions.is_empty() {
                    return Err(CoreError::Validation(
                        "Provide either conditions/actions or steps, not both".to_string(),
                    ));
                }
                RuleBody::Chained {
                    steps: steps.clone(),
                }
            }
            None => RuleBody::Simple(Stage {
                conditions: self.conditions.clone(),
                condition_logic: match &self.condition_logic {
                    Some(logic) => ConditionLogic::from_str(logic)?,
                    None => ConditionLogic::All,
                },
                actions: self.actions.clone(),
            }),
        };
        let definition = RuleDefinition {
            name: self.name.trim().to_string(),
            scope: EntityType::from_str(&self.scope)?,
            time_range: TimeRange::from_str(&self.time_range)?,
            body,
            target_label_ids: self.target_label_ids.clone(),
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// DTO for creating a new rule.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAutomationRule {
    pub owner_id: DbId,
    #[serde(flatten)]
    pub definition: RuleDefinitionInput,
    /// Defaults to `true` if omitted.
    pub is_active: Option<bool>,
}

/// DTO for replacing a rule's definition.
pub type UpdateAutomationRule = RuleDefinitionInput;

/// DTO for `PATCH /rules/{id}/toggle`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToggleAutomationRule {
    pub is_active: bool,
}
