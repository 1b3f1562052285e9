//! Route definitions for automation rules.

use axum::routing::{get, patch, post};
use axum::Router;

use crate::handlers::automation_rules;
use crate::state::AppState;

/// Routes mounted at `/rules`.
///
/// ```text
/// POST   /                          -> create_rule
/// GET    /                          -> list_rules
/// GET    /{id}                      -> get_rule
/// PUT    /{id}                      -> update_rule
/// DELETE /{id}                      -> delete_rule
/// PATCH  /{id}/toggle               -> toggle_rule
/// POST   /{id}/run                  -> run_rule
/// POST   /{id}/preview              -> preview_rule
/// GET    /{id}/executions           -> list_executions
/// GET    /{id}/runs                 -> list_runs
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(automation_rules::list_rules).post(automation_rules::create_rule),
        )
        .route(
            "/{id}",
            get(automation_rules::get_rule)
                .put(automation_rules::update_rule)
                .delete(automation_rules::delete_rule),
        )
        .route("/{id}/toggle", patch(automation_rules::toggle_rule))
        .route("/{id}/run", post(automation_rules::run_rule))
        .route("/{id}/preview", post(automation_rules::preview_rule))
        .route("/{id}/executions", get(automation_rules::list_executions))
        .route("/{id}/runs", get(automation_rules::list_runs))
}
