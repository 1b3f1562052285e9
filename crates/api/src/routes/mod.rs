pub mod automation_rules;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /rules                         list, create
/// /rules/{id}                    get, replace, delete
/// /rules/{id}/toggle             activate / deactivate
/// /rules/{id}/run                manual run (dry or live)
/// /rules/{id}/preview            match preview
/// /rules/{id}/executions         idempotency ledger rows
/// /rules/{id}/runs               run history
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/rules", automation_rules::router())
}
