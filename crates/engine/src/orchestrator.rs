//! Rule run orchestration.
//!
//! One call to [`Orchestrator::run`] claims the rule, fetches metrics, plans
//! matches and (for live runs) applies every configured action to every
//! matched entity, one paced gateway call at a time. Per-entity failures are
//! collected into the [`RunResult`]; only metrics outages, rejected
//! credentials and ledger failures abort the run.

use std::sync::Arc;

use adpilot_core::action::{resolve_action, CurrencyPolicy};
use adpilot_core::condition::evaluate_all;
use adpilot_core::error::CoreError;
use adpilot_core::ledger::{ExecutionRecord, LedgerEntry};
use adpilot_core::matching::{
    plan_matches, preview, EntityPreview, LabelFilter, MatchPlan, MatchedEntity,
};
use adpilot_core::metrics::EntityState;
use adpilot_core::rule::{AutomationRule, ExecutionStatus, RuleAction};
use adpilot_core::run::{
    EntityActionResult, EntityOutcome, RunReport, RunResult, RunState, RunStatus, RunTracker,
    RunTrigger,
};
use adpilot_core::types::DbId;
use chrono::Utc;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ledger::{IdempotencyLedger, LedgerDecision};
use crate::ports::{
    ActionGateway, ExecutionLedger, GatewayError, GatewayErrorKind, MetricsProvider,
    NotificationSink, RuleStore,
};
use crate::rate_limit::{CallPacer, PacerRegistry, RetryPolicy};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The ports an [`Orchestrator`] is wired to.
pub struct Collaborators {
    pub rules: Arc<dyn RuleStore>,
    pub metrics: Arc<dyn MetricsProvider>,
    pub gateway: Arc<dyn ActionGateway>,
    pub ledger: Arc<dyn ExecutionLedger>,
    pub notifier: Arc<dyn NotificationSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    pub rule_id: DbId,
    pub trigger: RunTrigger,
    pub dry_run: bool,
}

impl RunRequest {
    pub fn manual(rule_id: DbId, dry_run: bool) -> Self {
        Self {
            rule_id,
            trigger: RunTrigger::Manual,
            dry_run,
        }
    }

    pub fn scheduled(rule_id: DbId) -> Self {
        Self {
            rule_id,
            trigger: RunTrigger::Scheduled,
            dry_run: false,
        }
    }
}

/// A rule whose run claim is held by the caller.
///
/// Obtained from [`Orchestrator::claim`] and consumed by
/// [`Orchestrator::execute`].
#[derive(Debug)]
pub struct ClaimedRun {
    rule: AutomationRule,
    request: RunRequest,
}

impl ClaimedRun {
    pub fn rule(&self) -> &AutomationRule {
        &self.rule
    }

    pub fn request(&self) -> &RunRequest {
        &self.request
    }
}

/// Which entities a rule would match right now, without running it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchPreview {
    pub rule_id: DbId,
    pub no_data: bool,
    pub candidate_count: usize,
    pub matched_count: usize,
    pub entities: Vec<EntityPreview>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    rules: Arc<dyn RuleStore>,
    metrics: Arc<dyn MetricsProvider>,
    gateway: Arc<dyn ActionGateway>,
    ledger: IdempotencyLedger,
    notifier: Arc<dyn NotificationSink>,
    pacers: PacerRegistry,
    retry: RetryPolicy,
    currency: CurrencyPolicy,
}

/// Per-run values threaded through entity execution.
struct RunContext<'a> {
    rule: &'a AutomationRule,
    run_id: Uuid,
    trigger: RunTrigger,
    pacer: Arc<CallPacer>,
}

/// Accumulated output of one pass.
struct RunPass {
    result: RunResult,
    previews: Vec<EntityPreview>,
    no_data: bool,
}

enum ActionStep {
    Done(EntityActionResult),
    /// The action's own result plus the error that stops the run.
    Fatal(EntityActionResult, EngineError),
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: &EngineConfig) -> Self {
        Self {
            rules: collaborators.rules,
            metrics: collaborators.metrics,
            gateway: collaborators.gateway,
            ledger: IdempotencyLedger::new(collaborators.ledger),
            notifier: collaborators.notifier,
            pacers: PacerRegistry::new(config.action_pacing),
            retry: RetryPolicy::new(config.rate_limit_retry_delays.clone()),
            currency: config.currency.clone(),
        }
    }

    /// Rules eligible for scheduled evaluation.
    pub async fn active_rules(&self) -> Result<Vec<AutomationRule>, EngineError> {
        self.rules.list_active_rules(None).await
    }

    /// Run a rule once: [`claim`](Self::claim) then [`execute`](Self::execute).
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, EngineError> {
        let claimed = self.claim(request).await?;
        Ok(self.execute(claimed).await)
    }

    /// Take the rule's run claim.
    ///
    /// Fails for an unknown rule, for a scheduled dry run, and with
    /// [`EngineError::AlreadyRunning`] while another run holds the claim.
    pub async fn claim(&self, request: RunRequest) -> Result<ClaimedRun, EngineError> {
        if request.dry_run && request.trigger == RunTrigger::Scheduled {
            return Err(CoreError::Validation(
                "Dry runs can only be requested manually".to_string(),
            )
            .into());
        }

        let rule = self.rules.get_rule(request.rule_id).await?;
        if !self.rules.begin_run(rule.id).await? {
            return Err(EngineError::AlreadyRunning(rule.id));
        }
        Ok(ClaimedRun { rule, request })
    }

    /// Execute a claimed run to completion.
    ///
    /// Every outcome, including an aborted run, is returned as a
    /// [`RunReport`], persisted and announced to the notification sink.
    pub async fn execute(&self, claimed: ClaimedRun) -> RunReport {
        let ClaimedRun { rule, request } = claimed;
        let claim = ClaimGuard::new(Arc::clone(&self.rules), rule.id);
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let mut tracker = RunTracker::new();

        let span = tracing::info_span!(
            "rule_run",
            rule_id = rule.id,
            %run_id,
            trigger = request.trigger.as_str(),
            dry_run = request.dry_run
        );

        let mut pass = RunPass {
            result: RunResult::new(0, request.dry_run),
            previews: Vec::new(),
            no_data: false,
        };
        let outcome = self
            .drive(&rule, run_id, &request, &mut tracker, &mut pass)
            .instrument(span.clone())
            .await;

        let (status, error) = match outcome {
            Ok(()) => (RunStatus::Success, None),
            Err(e) => {
                tracing::error!(parent: &span, error = %e, "Rule run aborted");
                (RunStatus::Failed, Some(e.to_string()))
            }
        };
        if let Err(e) = tracker.advance(RunState::Completed(status)) {
            tracing::error!(parent: &span, error = %e, "Invalid run state transition");
        }

        let report = RunReport {
            run_id,
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            owner_id: rule.owner_id,
            trigger: request.trigger,
            status,
            no_data: pass.no_data,
            result: pass.result,
            previews: pass.previews,
            error,
            started_at,
            finished_at: Utc::now(),
        };

        self.finish(&report, claim).instrument(span.clone()).await;
        if let Err(e) = tracker.advance(RunState::Idle) {
            tracing::error!(parent: &span, error = %e, "Invalid run state transition");
        }

        tracing::info!(
            parent: &span,
            status = %report.status,
            matched = report.result.matched_count,
            succeeded = report.result.succeeded_count,
            failed = report.result.failed_count,
            skipped = report.result.skipped_count,
            "Rule run finished"
        );
        report
    }

    /// Plan matches for a rule, optionally narrowed to entities carrying one
    /// of `label_ids`. Nothing is claimed, executed or persisted.
    pub async fn preview_matches(
        &self,
        rule_id: DbId,
        label_ids: Vec<String>,
    ) -> Result<MatchPreview, EngineError> {
        let rule = self.rules.get_rule(rule_id).await?;
        let rows = self
            .metrics
            .fetch_metrics(rule.scope, rule.time_range, rule.owner_id)
            .await
            .map_err(metrics_unavailable)?;

        let filter = LabelFilter::new(label_ids);
        let plan = plan_matches(&rule, &rows, Some(&filter))?;
        let candidate_count = match &plan {
            MatchPlan::NoData => 0,
            MatchPlan::Evaluated {
                candidate_count, ..
            } => *candidate_count,
        };
        let entities = match rule.body.entry_stage() {
            Some(stage) => preview(
                plan.matched(),
                stage,
                &rule.target_label_ids,
                &self.currency,
            ),
            None => Vec::new(),
        };

        Ok(MatchPreview {
            rule_id,
            no_data: plan.is_no_data(),
            candidate_count,
            matched_count: plan.matched().len(),
            entities,
        })
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        rule: &AutomationRule,
        run_id: Uuid,
        request: &RunRequest,
        tracker: &mut RunTracker,
        pass: &mut RunPass,
    ) -> Result<(), EngineError> {
        tracker.advance(RunState::Pending)?;
        tracker.advance(RunState::Evaluating)?;
        let rows = self
            .metrics
            .fetch_metrics(rule.scope, rule.time_range, rule.owner_id)
            .await
            .map_err(metrics_unavailable)?;

        tracker.advance(RunState::Matching)?;
        let plan = plan_matches(rule, &rows, None)?;
        if plan.is_no_data() {
            pass.no_data = true;
            tracing::info!("No synced metrics for the rule's scope and time range");
            return Ok(());
        }

        let matched = plan.into_matched();
        pass.result.matched_count = matched.len();
        tracing::debug!(
            candidates = rows.len(),
            matched = matched.len(),
            "Match planning complete"
        );

        if request.dry_run {
            if let Some(stage) = rule.body.entry_stage() {
                pass.previews = preview(&matched, stage, &rule.target_label_ids, &self.currency);
            }
            return Ok(());
        }
        if matched.is_empty() {
            return Ok(());
        }

        tracker.advance(RunState::Executing)?;
        let ctx = RunContext {
            rule,
            run_id,
            trigger: request.trigger,
            pacer: self.pacers.for_owner(rule.owner_id).await,
        };

        for (index, entity) in matched.iter().enumerate() {
            let recorded = pass.result.per_entity_results.len();
            if let Err(e) = self.execute_entity(&ctx, entity, &mut pass.result).await {
                if pass.result.per_entity_results.len() == recorded {
                    pass.result.push(not_attempted(entity));
                }
                for remaining in &matched[index + 1..] {
                    pass.result.push(not_attempted(remaining));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Run every stage of the rule against one entity.
    ///
    /// Stage conditions after the first are checked against the snapshot
    /// taken at the start of the run. A stage that does not match, or in
    /// which an action failed, ends this entity's chain.
    async fn execute_entity(
        &self,
        ctx: &RunContext<'_>,
        entity: &MatchedEntity,
        result: &mut RunResult,
    ) -> Result<(), EngineError> {
        let row = &entity.row;
        let mut state = row.state();
        let mut previous = self
            .ledger
            .find(ctx.rule.id, row.entity_type, &row.entity_id)
            .await?;

        for (stage_index, stage) in ctx.rule.body.stages().iter().enumerate() {
            if stage_index > 0 && !evaluate_all(&stage.conditions, stage.condition_logic, row)? {
                tracing::debug!(
                    entity_id = %row.entity_id,
                    stage_index,
                    "Step conditions not met, chain ends"
                );
                break;
            }

            let mut stage_failed = false;
            for action in &stage.actions {
                let step = self
                    .execute_action(ctx, entity, stage_index, action, &mut state, &mut previous)
                    .await;
                match step {
                    ActionStep::Done(action_result) => {
                        stage_failed |= action_result.outcome == EntityOutcome::Failed;
                        result.push(action_result);
                    }
                    ActionStep::Fatal(action_result, e) => {
                        result.push(action_result);
                        return Err(e);
                    }
                }
            }

            if stage_failed {
                tracing::debug!(
                    entity_id = %row.entity_id,
                    stage_index,
                    "Step had a failed action, chain ends"
                );
                break;
            }
        }
        Ok(())
    }

    async fn execute_action(
        &self,
        ctx: &RunContext<'_>,
        entity: &MatchedEntity,
        stage_index: usize,
        action: &RuleAction,
        state: &mut EntityState,
        previous: &mut Option<ExecutionRecord>,
    ) -> ActionStep {
        let rule = ctx.rule;
        let row = &entity.row;
        let mut outcome = EntityActionResult {
            entity_id: row.entity_id.clone(),
            entity_type: row.entity_type,
            entity_name: row.name.clone(),
            action: Some(action.action_type),
            stage_index,
            outcome: EntityOutcome::Failed,
            error: None,
            budget_before: None,
            budget_after: None,
            skip_reason: None,
            attempts: 0,
        };

        let labels = action.effective_labels(&rule.target_label_ids);
        let decision =
            IdempotencyLedger::should_execute(previous.as_ref(), action.action_type, labels, state);
        if let LedgerDecision::Skip(reason) = decision {
            tracing::debug!(
                entity_id = %row.entity_id,
                action = %action.action_type,
                %reason,
                "Skipping redundant action"
            );
            outcome.outcome = EntityOutcome::Skipped;
            outcome.skip_reason = Some(reason);
            return ActionStep::Done(outcome);
        }

        let resolved = match resolve_action(action, &rule.target_label_ids, state, &self.currency)
        {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(
                    entity_id = %row.entity_id,
                    action = %action.action_type,
                    error = %e,
                    "Action could not be resolved"
                );
                outcome.error = Some(e.to_string());
                return ActionStep::Done(outcome);
            }
        };
        if let Some((from, to)) = resolved.budget_change() {
            outcome.budget_before = Some(from);
            outcome.budget_after = Some(to);
        }

        let applied = self
            .call_gateway(ctx, entity, &resolved, &mut outcome.attempts)
            .await;
        let new_state = match applied {
            Ok(new_state) => new_state,
            Err(e) => {
                outcome.error = Some(e.to_string());
                if e.kind.is_fatal() {
                    return ActionStep::Fatal(outcome, EngineError::GatewayAuth(e.detail));
                }
                tracing::warn!(
                    entity_id = %row.entity_id,
                    action = %action.action_type,
                    error = %e,
                    attempts = outcome.attempts,
                    "Action failed"
                );
                return ActionStep::Done(outcome);
            }
        };
        outcome.outcome = EntityOutcome::Succeeded;

        let entry = LedgerEntry {
            rule_id: rule.id,
            entity_type: row.entity_type,
            entity_id: row.entity_id.clone(),
            action_type: action.action_type,
            budget_before: outcome.budget_before,
            budget_after: outcome.budget_after,
            metadata: serde_json::json!({
                "run_id": ctx.run_id,
                "trigger": ctx.trigger.as_str(),
                "stage_index": stage_index,
                "entity_name": row.name,
                "reasons": entity.reason_lines(),
            }),
        };
        match self.ledger.record(&entry, previous.as_ref()).await {
            Ok(record) => *previous = Some(record),
            Err(e) => {
                outcome.error = Some(format!("applied but not recorded: {e}"));
                return ActionStep::Fatal(outcome, e);
            }
        }

        if let Err(e) = self
            .metrics
            .record_entity_state(rule.owner_id, row.entity_type, &row.entity_id, &new_state)
            .await
        {
            tracing::warn!(
                entity_id = %row.entity_id,
                error = %e,
                "Failed to refresh snapshot after action"
            );
        }

        tracing::info!(
            entity_id = %row.entity_id,
            action = %action.action_type,
            attempts = outcome.attempts,
            "Action applied"
        );
        *state = new_state;
        ActionStep::Done(outcome)
    }

    /// One paced gateway call, retried with backoff while rate limited.
    async fn call_gateway(
        &self,
        ctx: &RunContext<'_>,
        entity: &MatchedEntity,
        action: &adpilot_core::action::ResolvedAction,
        attempts: &mut u32,
    ) -> Result<EntityState, GatewayError> {
        let row = &entity.row;
        let mut retry = 0;
        loop {
            ctx.pacer.pace().await;
            *attempts += 1;

            let err = match self
                .gateway
                .apply_action(&row.entity_id, row.entity_type, action)
                .await
            {
                Ok(state) => return Ok(state),
                Err(err) => err,
            };
            if err.kind != GatewayErrorKind::RateLimited {
                return Err(err);
            }

            let Some(delay) = self.retry.delay_for(retry, err.retry_after) else {
                let detail = format!("still rate limited after {attempts} attempts: {}", err.detail);
                return Err(GatewayError { detail, ..err });
            };
            tracing::warn!(
                entity_id = %row.entity_id,
                retry = retry + 1,
                delay_ms = delay.as_millis() as u64,
                "Action gateway rate limited, backing off"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    /// Persist the terminal status and history, then notify.
    ///
    /// Failures here are logged; the run's outcome is already decided.
    async fn finish(&self, report: &RunReport, claim: ClaimGuard) {
        if let Err(e) = self
            .rules
            .update_execution_status(
                report.rule_id,
                report.status.execution_status(),
                report.error.as_deref(),
            )
            .await
        {
            tracing::error!(error = %e, "Failed to persist run status");
        }
        claim.release();

        if let Err(e) = self.rules.save_run_report(report).await {
            tracing::error!(error = %e, "Failed to save run report");
        }

        let summary = report.summary();
        if let Err(e) = self.notifier.notify(report.owner_id, &summary).await {
            tracing::warn!(error = %e, "Run notification failed");
        }
    }
}

/// Error recorded on a rule whose run was dropped before it finished.
pub const RUN_INTERRUPTED: &str = "Run interrupted before completion";

/// Held while a claimed run executes. If the run future is dropped before
/// its terminal status is persisted, the claim is released as `failed` so
/// the rule does not stay `pending` until the stale-run window passes.
struct ClaimGuard {
    rules: Arc<dyn RuleStore>,
    rule_id: DbId,
    armed: bool,
}

impl ClaimGuard {
    fn new(rules: Arc<dyn RuleStore>, rule_id: DbId) -> Self {
        Self {
            rules,
            rule_id,
            armed: true,
        }
    }

    /// The terminal status has been written; nothing left to undo.
    fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let rule_id = self.rule_id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(rule_id, "Run dropped outside a runtime, claim left pending");
            return;
        };

        tracing::warn!(rule_id, "Rule run interrupted, releasing claim");
        let rules = Arc::clone(&self.rules);
        runtime.spawn(async move {
            if let Err(e) = rules
                .update_execution_status(rule_id, ExecutionStatus::Failed, Some(RUN_INTERRUPTED))
                .await
            {
                tracing::error!(rule_id, error = %e, "Failed to release interrupted run claim");
            }
        });
    }
}

fn metrics_unavailable(e: EngineError) -> EngineError {
    match e {
        EngineError::MetricsUnavailable(_) => e,
        other => EngineError::MetricsUnavailable(other.to_string()),
    }
}

fn not_attempted(entity: &MatchedEntity) -> EntityActionResult {
    EntityActionResult {
        entity_id: entity.row.entity_id.clone(),
        entity_type: entity.row.entity_type,
        entity_name: entity.row.name.clone(),
        action: None,
        stage_index: 0,
        outcome: EntityOutcome::NotAttempted,
        error: None,
        budget_before: None,
        budget_after: None,
        skip_reason: None,
        attempts: 0,
    }
}
