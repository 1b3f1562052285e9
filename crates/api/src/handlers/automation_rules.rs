//! Handlers for automation rule management and manual runs.

use std::sync::Arc;

use adpilot_core::error::CoreError;
use adpilot_core::rule::ExecutionStatus;
use adpilot_core::run::RunReport;
use adpilot_core::types::DbId;
use adpilot_db::models::automation_rule::{
    AutomationRuleRow, CreateAutomationRule, StoredBody, ToggleAutomationRule,
    UpdateAutomationRule,
};
use adpilot_db::models::execution_record::ExecutionRecordRow;
use adpilot_db::models::rule_run::RuleRunRow;
use adpilot_db::repositories::{AutomationRuleRepo, RuleExecutionRepo, RuleRunRepo};
use adpilot_engine::{MatchPreview, RunRequest};
use adpilot_events::PlatformEvent;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

const RULE_CREATED: &str = "automation.rule_created";
const RULE_UPDATED: &str = "automation.rule_updated";
const RULE_DELETED: &str = "automation.rule_deleted";

/// Default and maximum page sizes for history listings.
const DEFAULT_PAGE: i64 = 25;
const MAX_PAGE: i64 = 100;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RuleListQuery {
    pub owner_id: Option<DbId>,
    pub is_active: Option<bool>,
}

/// Body of `POST /rules/{id}/run`.
#[derive(Debug, Default, Deserialize)]
pub struct RunRuleRequest {
    #[serde(default)]
    pub dry_run: bool,
}

/// Body of `POST /rules/{id}/preview`.
#[derive(Debug, Default, Deserialize)]
pub struct PreviewRuleRequest {
    /// Only consider entities carrying at least one of these labels.
    #[serde(default)]
    pub label_ids: Vec<String>,
}

/// Returned when a live run has been claimed and started in the background.
#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub rule_id: DbId,
    pub execution_status: &'static str,
}

fn rule_not_found(id: DbId) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "AutomationRule",
        id,
    })
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// POST /rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(input): Json<CreateAutomationRule>,
) -> AppResult<(StatusCode, Json<DataResponse<AutomationRuleRow>>)> {
    let definition = input.definition.to_definition()?;
    let body = StoredBody::from_body(&definition.body)?;
    let rule = AutomationRuleRepo::create(
        &state.pool,
        input.owner_id,
        &definition,
        &body,
        input.is_active.unwrap_or(true),
    )
    .await?;

    tracing::info!(rule_id = rule.id, owner_id = rule.owner_id, "Automation rule created");
    state.event_bus.publish(
        PlatformEvent::new(RULE_CREATED)
            .with_source("automation_rule", rule.id)
            .with_actor(rule.owner_id)
            .with_payload(serde_json::json!({
                "name": rule.name,
                "scope": rule.scope,
            })),
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: rule })))
}

/// GET /rules
pub async fn list_rules(
    State(state): State<AppState>,
    Query(params): Query<RuleListQuery>,
) -> AppResult<Json<DataResponse<Vec<AutomationRuleRow>>>> {
    let rules = AutomationRuleRepo::list(&state.pool, params.owner_id, params.is_active).await?;
    Ok(Json(DataResponse { data: rules }))
}

/// GET /rules/{id}
pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<AutomationRuleRow>>> {
    let rule = AutomationRuleRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| rule_not_found(id))?;
    Ok(Json(DataResponse { data: rule }))
}

/// PUT /rules/{id}
///
/// Replaces the rule's definition. Run state and ledger history are kept.
pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<UpdateAutomationRule>,
) -> AppResult<Json<DataResponse<AutomationRuleRow>>> {
    let definition = input.to_definition()?;
    let body = StoredBody::from_body(&definition.body)?;
    let rule = AutomationRuleRepo::update_definition(&state.pool, id, &definition, &body)
        .await?
        .ok_or_else(|| rule_not_found(id))?;

    state.event_bus.publish(
        PlatformEvent::new(RULE_UPDATED)
            .with_source("automation_rule", rule.id)
            .with_actor(rule.owner_id),
    );

    Ok(Json(DataResponse { data: rule }))
}

/// DELETE /rules/{id}
///
/// Ledger rows for the rule are retained as audit history.
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    let rule = AutomationRuleRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| rule_not_found(id))?;
    if !AutomationRuleRepo::delete(&state.pool, id).await? {
        return Err(rule_not_found(id));
    }

    tracing::info!(rule_id = id, "Automation rule deleted");
    state.event_bus.publish(
        PlatformEvent::new(RULE_DELETED)
            .with_source("automation_rule", id)
            .with_actor(rule.owner_id),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /rules/{id}/toggle
pub async fn toggle_rule(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<ToggleAutomationRule>,
) -> AppResult<Json<DataResponse<AutomationRuleRow>>> {
    let rule = AutomationRuleRepo::set_active(&state.pool, id, input.is_active)
        .await?
        .ok_or_else(|| rule_not_found(id))?;
    Ok(Json(DataResponse { data: rule }))
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// POST /rules/{id}/run
///
/// The body is optional and defaults to a live run. Dry runs return the
/// report; live runs are claimed synchronously (409 if one is already in
/// progress) and the response is 202. Both execute on the tracked
/// background set, so a dropped request never strands the claim.
pub async fn run_rule(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    input: Option<Json<RunRuleRequest>>,
) -> AppResult<Response> {
    let input = input.map(|Json(body)| body).unwrap_or_default();
    let claimed = state
        .orchestrator
        .claim(RunRequest::manual(id, input.dry_run))
        .await?;

    let orchestrator = Arc::clone(&state.orchestrator);
    let run = state.background_runs.spawn(async move {
        let report = orchestrator.execute(claimed).await;
        tracing::debug!(
            rule_id = report.rule_id,
            run_id = %report.run_id,
            status = %report.status,
            "Manual run finished"
        );
        report
    });

    if input.dry_run {
        let report: RunReport = run
            .await
            .map_err(|e| AppError::InternalError(format!("Dry run task failed: {e}")))?;
        return Ok(Json(DataResponse { data: report }).into_response());
    }

    let accepted = RunAccepted {
        rule_id: id,
        execution_status: ExecutionStatus::Pending.as_str(),
    };
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: accepted })).into_response())
}

/// POST /rules/{id}/preview
pub async fn preview_rule(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<PreviewRuleRequest>,
) -> AppResult<Json<DataResponse<MatchPreview>>> {
    let preview = state
        .orchestrator
        .preview_matches(id, input.label_ids)
        .await?;
    Ok(Json(DataResponse { data: preview }))
}

/// GET /rules/{id}/executions
///
/// Ledger rows for the rule, most recently executed first. Rows survive
/// rule deletion, so an unknown id yields an empty list rather than 404.
pub async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<DataResponse<Vec<ExecutionRecordRow>>>> {
    let limit = adpilot_db::clamp_limit(params.limit, DEFAULT_PAGE, MAX_PAGE);
    let offset = adpilot_db::clamp_offset(params.offset);
    let records = RuleExecutionRepo::list_by_rule(&state.pool, id, limit, offset).await?;
    Ok(Json(DataResponse { data: records }))
}

/// GET /rules/{id}/runs
pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<DataResponse<Vec<RuleRunRow>>>> {
    let limit = adpilot_db::clamp_limit(params.limit, DEFAULT_PAGE, MAX_PAGE);
    let offset = adpilot_db::clamp_offset(params.offset);
    let runs = RuleRunRepo::list_by_rule(&state.pool, id, limit, offset).await?;
    Ok(Json(DataResponse { data: runs }))
}
