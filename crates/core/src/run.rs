//! Run lifecycle: the orchestrator's state machine and the result types a
//! run produces.
//!
//! Allowed transitions:
//!
//! ```text
//! Idle -> Pending -> Evaluating -> Matching -> Executing -> Completed -> Idle
//!                        |             |
//!                        +-> Completed +-> Completed (dry run, no data, error)
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::ledger::SkipReason;
use crate::matching::EntityPreview;
use crate::metrics::EntityType;
use crate::rule::{ActionType, ExecutionStatus};
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// RunStatus / RunTrigger
// ---------------------------------------------------------------------------

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::Validation(format!(
                "Invalid run status: '{s}'. Must be one of: success, failed"
            ))),
        }
    }

    /// The rule-level status persisted once the run completes.
    pub fn execution_status(&self) -> ExecutionStatus {
        match self {
            Self::Success => ExecutionStatus::Success,
            Self::Failed => ExecutionStatus::Failed,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Manual,
    Scheduled,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            _ => Err(CoreError::Validation(format!(
                "Invalid run trigger: '{s}'. Must be one of: manual, scheduled"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Phase of a single orchestrator pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "status", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Pending,
    Evaluating,
    Matching,
    Executing,
    Completed(RunStatus),
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Evaluating => "evaluating",
            Self::Matching => "matching",
            Self::Executing => "executing",
            Self::Completed(RunStatus::Success) => "completed_success",
            Self::Completed(RunStatus::Failed) => "completed_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether `from -> to` is an edge of the run state machine.
pub fn can_transition(from: RunState, to: RunState) -> bool {
    use RunState::*;
    matches!(
        (from, to),
        (Idle, Pending)
            | (Pending, Evaluating)
            | (Pending, Completed(RunStatus::Failed))
            | (Evaluating, Matching)
            | (Evaluating, Completed(RunStatus::Failed))
            | (Matching, Executing)
            | (Matching, Completed(_))
            | (Executing, Completed(_))
            | (Completed(_), Idle)
    )
}

/// Validate a transition, naming both states on failure.
pub fn validate_transition(from: RunState, to: RunState) -> Result<(), CoreError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::Internal(format!(
            "Cannot transition run from '{from}' to '{to}'"
        )))
    }
}

/// Tracks one run's current state and rejects illegal transitions.
#[derive(Debug, Clone)]
pub struct RunTracker {
    state: RunState,
    history: Vec<RunState>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            history: vec![RunState::Idle],
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state visited so far, in order.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), CoreError> {
        validate_transition(self.state, next)?;
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-entity results
// ---------------------------------------------------------------------------

/// What happened to one action on one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityOutcome {
    Succeeded,
    Failed,
    /// Ledger policy found the action already in effect.
    Skipped,
    /// The run aborted before this entity was reached.
    NotAttempted,
}

impl EntityOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::NotAttempted => "not_attempted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityActionResult {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub entity_name: String,
    /// `None` only for entities the run never reached.
    pub action: Option<ActionType>,
    /// Zero-based stage index; always 0 for simple rules.
    pub stage_index: usize,
    pub outcome: EntityOutcome,
    pub error: Option<String>,
    pub budget_before: Option<f64>,
    pub budget_after: Option<f64>,
    pub skip_reason: Option<SkipReason>,
    /// Gateway calls made, including rate-limit retries.
    pub attempts: u32,
}

/// Aggregate output of one orchestrator pass.
///
/// `executed_count` counts actions sent to the gateway, so it always equals
/// `succeeded_count + failed_count`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub matched_count: usize,
    pub executed_count: usize,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub per_entity_results: Vec<EntityActionResult>,
    pub dry_run: bool,
}

impl RunResult {
    pub fn new(matched_count: usize, dry_run: bool) -> Self {
        Self {
            matched_count,
            dry_run,
            ..Self::default()
        }
    }

    pub fn push(&mut self, result: EntityActionResult) {
        match result.outcome {
            EntityOutcome::Succeeded => {
                self.executed_count += 1;
                self.succeeded_count += 1;
            }
            EntityOutcome::Failed => {
                self.executed_count += 1;
                self.failed_count += 1;
            }
            EntityOutcome::Skipped => self.skipped_count += 1,
            EntityOutcome::NotAttempted => {}
        }
        self.per_entity_results.push(result);
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntityActionResult> {
        self.per_entity_results
            .iter()
            .filter(|r| r.outcome == EntityOutcome::Failed)
    }
}

// ---------------------------------------------------------------------------
// RunReport / RunSummary
// ---------------------------------------------------------------------------

/// Everything known about a finished run. Persisted as run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub rule_id: DbId,
    pub rule_name: String,
    pub owner_id: DbId,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    /// The metrics provider returned no rows for the scope and time range.
    pub no_data: bool,
    pub result: RunResult,
    /// Planned actions for dry runs; empty for live runs.
    pub previews: Vec<EntityPreview>,
    pub error: Option<String>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            rule_id: self.rule_id,
            rule_name: self.rule_name.clone(),
            owner_id: self.owner_id,
            status: self.status,
            dry_run: self.result.dry_run,
            no_data: self.no_data,
            matched_count: self.result.matched_count,
            executed_count: self.result.executed_count,
            succeeded_count: self.result.succeeded_count,
            failed_count: self.result.failed_count,
            skipped_count: self.result.skipped_count,
            error: self.error.clone(),
            failures: self
                .result
                .failures()
                .map(|r| FailureLine {
                    entity_id: r.entity_id.clone(),
                    entity_name: r.entity_name.clone(),
                    error: r.error.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureLine {
    pub entity_id: String,
    pub entity_name: String,
    pub error: String,
}

/// The compact payload sent to the owner when a run completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub rule_id: DbId,
    pub rule_name: String,
    pub owner_id: DbId,
    pub status: RunStatus,
    pub dry_run: bool,
    pub no_data: bool,
    pub matched_count: usize,
    pub executed_count: usize,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub error: Option<String>,
    pub failures: Vec<FailureLine>,
}

impl RunSummary {
    /// One-line message for the owner.
    pub fn headline(&self) -> String {
        if let Some(error) = &self.error {
            return format!("Rule '{}' failed: {error}", self.rule_name);
        }
        if self.no_data {
            return format!(
                "Rule '{}' found no synced metrics for its time range. Sync your ad data and try again.",
                self.rule_name
            );
        }
        if self.dry_run {
            return format!(
                "Test run of '{}' matched {} entities. No changes were made.",
                self.rule_name, self.matched_count
            );
        }
        format!(
            "Rule '{}' matched {} entities: {} succeeded, {} failed, {} skipped.",
            self.rule_name,
            self.matched_count,
            self.succeeded_count,
            self.failed_count,
            self.skipped_count
        )
    }
}
