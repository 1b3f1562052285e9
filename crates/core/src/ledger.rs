//! Idempotency ledger records and the skip policy built on them.
//!
//! The ledger keeps one [`ExecutionRecord`] per `(rule, entity type, entity)`
//! key. It is an audit trail and anti-flap mechanism, not a budget cache:
//! budget actions are never skipped on history alone.

use serde::{Deserialize, Serialize};

use crate::metrics::{EntityState, EntityStatus, EntityType};
use crate::rule::ActionType;
use crate::types::{DbId, Timestamp};

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub rule_id: DbId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub last_action_type: ActionType,
    pub execution_count: i32,
    pub last_executed_at: Timestamp,
    pub last_budget_before: Option<f64>,
    pub last_budget_after: Option<f64>,
    pub metadata: serde_json::Value,
}

/// A successful action to be written to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub rule_id: DbId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action_type: ActionType,
    pub budget_before: Option<f64>,
    pub budget_after: Option<f64>,
    pub metadata: serde_json::Value,
}

impl LedgerEntry {
    /// Apply this entry on top of the previous record (if any).
    ///
    /// The first write creates the record with a count of one; later writes
    /// update it in place and bump the count.
    pub fn apply_to(&self, previous: Option<&ExecutionRecord>, now: Timestamp) -> ExecutionRecord {
        ExecutionRecord {
            rule_id: self.rule_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            last_action_type: self.action_type,
            execution_count: previous.map_or(0, |p| p.execution_count) + 1,
            last_executed_at: now,
            last_budget_before: self.budget_before,
            last_budget_after: self.budget_after,
            metadata: self.metadata.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Skip policy
// ---------------------------------------------------------------------------

/// Why an action was not sent to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Last action was `turn_off` and the entity is still paused.
    AlreadyOff,
    /// Last action was `turn_on` and the entity is still active.
    AlreadyOn,
    /// Last action was `assign_label` and every target label is present.
    LabelsPresent,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyOff => "already_off",
            Self::AlreadyOn => "already_on",
            Self::LabelsPresent => "labels_present",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide whether repeating `action` would be a redundant write.
///
/// Skips only when the ledger says this rule already applied the same action
/// type *and* the entity's current state still reflects it. Budget changes
/// are never skipped.
pub fn skip_reason(
    previous: Option<&ExecutionRecord>,
    action: ActionType,
    target_labels: &[String],
    state: &EntityState,
) -> Option<SkipReason> {
    let previous = previous?;
    if previous.last_action_type != action {
        return None;
    }
    match action {
        ActionType::TurnOff if state.status == EntityStatus::Paused => Some(SkipReason::AlreadyOff),
        ActionType::TurnOn if state.status == EntityStatus::Active => Some(SkipReason::AlreadyOn),
        ActionType::AssignLabel
            if !target_labels.is_empty() && state.has_all_labels(target_labels) =>
        {
            Some(SkipReason::LabelsPresent)
        }
        _ => None,
    }
}
