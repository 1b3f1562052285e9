#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use adpilot_core::action::ResolvedAction;
use adpilot_core::metrics::{EntityState, EntityStatus, EntityType};
use adpilot_db::models::metric_snapshot::UpsertMetricSnapshot;
use adpilot_db::repositories::MetricSnapshotRepo;
use adpilot_engine::adapters::{EventBusNotifier, PgExecutionLedger, PgMetricsProvider, PgRuleStore};
use adpilot_engine::ports::{ActionGateway, GatewayError};
use adpilot_engine::{Collaborators, EngineConfig, Orchestrator};
use adpilot_events::EventBus;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use adpilot_api::config::ServerConfig;
use adpilot_api::routes;
use adpilot_api::state::AppState;

pub const OWNER: i64 = 1;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

/// Gateway that accepts every action and echoes the resulting state.
pub struct AcceptingGateway;

#[async_trait]
impl ActionGateway for AcceptingGateway {
    async fn apply_action(
        &self,
        _entity_id: &str,
        _entity_type: EntityType,
        action: &ResolvedAction,
    ) -> Result<EntityState, GatewayError> {
        let state = match action {
            ResolvedAction::TurnOn => EntityState {
                status: EntityStatus::Active,
                current_budget: None,
                label_ids: Vec::new(),
            },
            ResolvedAction::TurnOff => EntityState {
                status: EntityStatus::Paused,
                current_budget: None,
                label_ids: Vec::new(),
            },
            ResolvedAction::SetBudget { to, .. } => EntityState {
                status: EntityStatus::Active,
                current_budget: Some(*to),
                label_ids: Vec::new(),
            },
            ResolvedAction::AddLabels { label_ids } => EntityState {
                status: EntityStatus::Active,
                current_budget: None,
                label_ids: label_ids.clone(),
            },
        };
        Ok(state)
    }
}

fn test_orchestrator(pool: PgPool, bus: Arc<EventBus>) -> Orchestrator {
    let config = EngineConfig {
        action_pacing: Duration::ZERO,
        rate_limit_retry_delays: vec![Duration::ZERO],
        ..EngineConfig::default()
    };
    let collaborators = Collaborators {
        rules: Arc::new(PgRuleStore::new(pool.clone(), config.stale_run_after)),
        metrics: Arc::new(PgMetricsProvider::new(pool.clone())),
        gateway: Arc::new(AcceptingGateway),
        ledger: Arc::new(PgExecutionLedger::new(pool)),
        notifier: Arc::new(EventBusNotifier::new(bus)),
    };
    Orchestrator::new(collaborators, &config)
}

/// Build the full application router with all middleware layers.
///
/// Mirrors the router construction in `main.rs`.
pub fn build_test_app(pool: PgPool) -> Router {
    build_test_app_with_runs(pool).0
}

/// Like [`build_test_app`], also returning the tracker that owns background
/// runs so tests can wait for them.
pub fn build_test_app_with_runs(pool: PgPool) -> (Router, TaskTracker) {
    let event_bus = Arc::new(EventBus::default());
    let background_runs = TaskTracker::new();

    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(test_config()),
        event_bus: Arc::clone(&event_bus),
        orchestrator: Arc::new(test_orchestrator(pool, event_bus)),
        background_runs: background_runs.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    let app = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);

    (app, background_runs)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

async fn send(app: Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, None).await
}

/// POST with no body and no content type.
pub async fn post_empty(app: Router, uri: &str) -> Response {
    send(app, Method::POST, uri, None).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    send(app, Method::PUT, uri, Some(body)).await
}

pub async fn patch_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    send(app, Method::PATCH, uri, Some(body)).await
}

pub async fn delete(app: Router, uri: &str) -> Response {
    send(app, Method::DELETE, uri, None).await
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Seed a campaign snapshot for `last_7_days`.
pub async fn seed_campaign(pool: &PgPool, entity_id: &str, spend: f64, budget: Option<f64>) {
    MetricSnapshotRepo::upsert(
        pool,
        &UpsertMetricSnapshot {
            owner_id: OWNER,
            entity_type: "campaign".to_string(),
            entity_id: entity_id.to_string(),
            time_range: "last_7_days".to_string(),
            name: format!("Campaign {entity_id}"),
            spend,
            impressions: 1000,
            clicks: 10,
            results: 0.0,
            current_budget: budget,
            status: "active".to_string(),
            label_ids: Vec::new(),
            extra_metrics: None,
        },
    )
    .await
    .unwrap();
}

/// A rule that pauses campaigns spending at least `min_spend`.
pub fn pause_rule_body(name: &str, min_spend: f64) -> serde_json::Value {
    serde_json::json!({
        "owner_id": OWNER,
        "name": name,
        "scope": "campaign",
        "time_range": "last_7_days",
        "conditions": [{"metric": "spend", "operator": "gte", "value": min_spend}],
        "actions": [{"type": "turn_off"}],
    })
}

/// Create a rule through the API and return its id.
pub async fn create_rule(pool: &PgPool, body: serde_json::Value) -> i64 {
    let response = post_json(build_test_app(pool.clone()), "/api/v1/rules", body).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["data"]["id"].as_i64().unwrap()
}
