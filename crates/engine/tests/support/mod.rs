//! In-memory fakes for the engine ports.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adpilot_core::action::ResolvedAction;
use adpilot_core::error::CoreError;
use adpilot_core::ledger::{ExecutionRecord, LedgerEntry};
use adpilot_core::metrics::{EntityState, EntityStatus, EntityType, Metric, MetricsRow};
use adpilot_core::rule::{
    ActionType, AutomationRule, Condition, ConditionLogic, ExecutionStatus, Operator, RuleAction,
    RuleBody, Stage, TimeRange,
};
use adpilot_core::run::{RunReport, RunSummary};
use adpilot_core::types::{DbId, Timestamp};
use adpilot_engine::ports::{
    ActionGateway, ExecutionLedger, GatewayError, GatewayErrorKind, LedgerWrite, MetricsProvider,
    NotificationSink, RuleStore,
};
use adpilot_engine::{Collaborators, EngineConfig, EngineError, Orchestrator};
use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const OWNER: DbId = 1;

pub fn campaign(id: &str, spend: f64, budget: Option<f64>) -> MetricsRow {
    MetricsRow {
        entity_id: id.to_string(),
        entity_type: EntityType::Campaign,
        name: format!("Campaign {id}"),
        spend,
        impressions: 10_000,
        clicks: 100,
        results: 5.0,
        current_budget: budget,
        status: EntityStatus::Active,
        label_ids: vec![],
        extra_metrics: BTreeMap::new(),
    }
}

pub fn spend_at_least(value: f64) -> Condition {
    Condition {
        metric: Metric::Spend,
        operator: Operator::Gte,
        value,
    }
}

pub fn stage(conditions: Vec<Condition>, actions: Vec<RuleAction>) -> Stage {
    Stage {
        conditions,
        condition_logic: ConditionLogic::All,
        actions,
    }
}

pub fn rule(id: DbId, body: RuleBody) -> AutomationRule {
    AutomationRule {
        id,
        owner_id: OWNER,
        name: format!("rule-{id}"),
        scope: EntityType::Campaign,
        time_range: TimeRange::Today,
        body,
        target_label_ids: vec![],
        is_active: true,
        execution_status: ExecutionStatus::Idle,
        last_run_at: None,
        last_error: None,
    }
}

/// `spend >= 0 -> turn_off`.
pub fn turn_off_rule(id: DbId) -> AutomationRule {
    rule(
        id,
        RuleBody::Simple(stage(
            vec![spend_at_least(0.0)],
            vec![RuleAction::new(ActionType::TurnOff)],
        )),
    )
}

pub fn config(pacing: Duration) -> EngineConfig {
    EngineConfig {
        action_pacing: pacing,
        rate_limit_retry_delays: [5, 15, 45].map(Duration::from_secs).to_vec(),
        ..EngineConfig::default()
    }
}

pub fn gateway_error(kind: GatewayErrorKind) -> GatewayError {
    GatewayError::new(kind, format!("scripted {kind}"))
}

// ---------------------------------------------------------------------------
// Rule store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRules {
    pub rules: Mutex<HashMap<DbId, AutomationRule>>,
    pub reports: Mutex<Vec<RunReport>>,
}

impl MemoryRules {
    pub fn insert(&self, rule: AutomationRule) {
        self.rules.lock().unwrap().insert(rule.id, rule);
    }

    pub fn get(&self, id: DbId) -> AutomationRule {
        self.rules.lock().unwrap()[&id].clone()
    }

    pub fn set_status(&self, id: DbId, status: ExecutionStatus) {
        self.rules.lock().unwrap().get_mut(&id).unwrap().execution_status = status;
    }

    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl RuleStore for MemoryRules {
    async fn list_active_rules(
        &self,
        owner_id: Option<DbId>,
    ) -> Result<Vec<AutomationRule>, EngineError> {
        let mut rules: Vec<_> = self
            .rules
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.is_active && owner_id.map_or(true, |o| r.owner_id == o))
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn get_rule(&self, rule_id: DbId) -> Result<AutomationRule, EngineError> {
        self.rules
            .lock()
            .unwrap()
            .get(&rule_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound {
                    entity: "AutomationRule",
                    id: rule_id,
                }
                .into()
            })
    }

    async fn begin_run(&self, rule_id: DbId) -> Result<bool, EngineError> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.get_mut(&rule_id).unwrap();
        if rule.execution_status == ExecutionStatus::Pending {
            return Ok(false);
        }
        rule.execution_status = ExecutionStatus::Pending;
        Ok(true)
    }

    async fn update_execution_status(
        &self,
        rule_id: DbId,
        status: ExecutionStatus,
        detail: Option<&str>,
    ) -> Result<(), EngineError> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.get_mut(&rule_id).unwrap();
        rule.execution_status = status;
        rule.last_error = detail.map(str::to_string);
        rule.last_run_at = Some(Utc::now());
        Ok(())
    }

    async fn save_run_report(&self, report: &RunReport) -> Result<(), EngineError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryMetrics {
    pub rows: Mutex<Vec<MetricsRow>>,
    pub unavailable: Mutex<bool>,
    /// Simulated latency of every fetch.
    pub delay: Mutex<Option<Duration>>,
}

impl MemoryMetrics {
    pub fn with_rows(rows: Vec<MetricsRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
            unavailable: Mutex::new(false),
            delay: Mutex::new(None),
        }
    }

    pub fn row(&self, entity_id: &str) -> MetricsRow {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.entity_id == entity_id)
            .cloned()
            .unwrap()
    }
}

#[async_trait]
impl MetricsProvider for MemoryMetrics {
    async fn fetch_metrics(
        &self,
        scope: EntityType,
        _time_range: TimeRange,
        _owner_id: DbId,
    ) -> Result<Vec<MetricsRow>, EngineError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.unavailable.lock().unwrap() {
            return Err(EngineError::MetricsUnavailable(
                "snapshot store offline".to_string(),
            ));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.entity_type == scope)
            .cloned()
            .collect())
    }

    async fn record_entity_state(
        &self,
        _owner_id: DbId,
        _entity_type: EntityType,
        entity_id: &str,
        state: &EntityState,
    ) -> Result<(), EngineError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| r.entity_id == entity_id) {
            row.status = state.status;
            row.current_budget = state.current_budget;
            row.label_ids = state.label_ids.clone();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatewayCall {
    pub entity_id: String,
    pub action: ResolvedAction,
    pub at: Instant,
}

/// Applies actions to an in-memory copy of entity state. Failures can be
/// scripted per entity and are consumed in order.
#[derive(Default)]
pub struct FakeGateway {
    pub states: Mutex<HashMap<String, EntityState>>,
    pub failures: Mutex<HashMap<String, VecDeque<GatewayError>>>,
    pub calls: Mutex<Vec<GatewayCall>>,
}

impl FakeGateway {
    pub fn seeded(rows: &[MetricsRow]) -> Self {
        let states = rows
            .iter()
            .map(|r| (r.entity_id.clone(), r.state()))
            .collect();
        Self {
            states: Mutex::new(states),
            ..Self::default()
        }
    }

    pub fn fail_next(&self, entity_id: &str, error: GatewayError) {
        self.failures
            .lock()
            .unwrap()
            .entry(entity_id.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ActionGateway for FakeGateway {
    async fn apply_action(
        &self,
        entity_id: &str,
        _entity_type: EntityType,
        action: &ResolvedAction,
    ) -> Result<EntityState, GatewayError> {
        self.calls.lock().unwrap().push(GatewayCall {
            entity_id: entity_id.to_string(),
            action: action.clone(),
            at: Instant::now(),
        });

        if let Some(error) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(entity_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(entity_id.to_string())
            .or_insert_with(|| EntityState {
                status: EntityStatus::Active,
                current_budget: None,
                label_ids: vec![],
            });
        match action {
            ResolvedAction::TurnOn => state.status = EntityStatus::Active,
            ResolvedAction::TurnOff => state.status = EntityStatus::Paused,
            ResolvedAction::SetBudget { to, .. } => state.current_budget = Some(*to),
            ResolvedAction::AddLabels { label_ids } => {
                for id in label_ids {
                    if !state.label_ids.contains(id) {
                        state.label_ids.push(id.clone());
                    }
                }
            }
        }
        Ok(state.clone())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

type LedgerKey = (DbId, EntityType, String);

#[derive(Default)]
pub struct MemoryLedger {
    pub records: Mutex<HashMap<LedgerKey, ExecutionRecord>>,
    pub writes: AtomicUsize,
    /// Number of upcoming writes to refuse as conflicts.
    pub forced_conflicts: AtomicUsize,
}

impl MemoryLedger {
    pub fn record(&self, rule_id: DbId, entity_id: &str) -> Option<ExecutionRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(rule_id, EntityType::Campaign, entity_id.to_string()))
            .cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionLedger for MemoryLedger {
    async fn find(
        &self,
        rule_id: DbId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ExecutionRecord>, EngineError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(rule_id, entity_type, entity_id.to_string()))
            .cloned())
    }

    async fn write_if_unchanged(
        &self,
        entry: &LedgerEntry,
        expected: Option<Timestamp>,
    ) -> Result<LedgerWrite, EngineError> {
        if self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(LedgerWrite::Conflict);
        }

        let key = (entry.rule_id, entry.entity_type, entry.entity_id.clone());
        let mut records = self.records.lock().unwrap();
        let current = records.get(&key);
        if current.map(|r| r.last_executed_at) != expected {
            return Ok(LedgerWrite::Conflict);
        }
        let record = entry.apply_to(current, Utc::now());
        records.insert(key, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(LedgerWrite::Applied(record))
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<RunSummary>>,
    pub broken: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<RunSummary> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, _owner_id: DbId, summary: &RunSummary) -> Result<(), EngineError> {
        if *self.broken.lock().unwrap() {
            return Err(EngineError::Core(CoreError::Internal(
                "mail relay down".to_string(),
            )));
        }
        self.sent.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub rules: Arc<MemoryRules>,
    pub metrics: Arc<MemoryMetrics>,
    pub gateway: Arc<FakeGateway>,
    pub ledger: Arc<MemoryLedger>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(rule: AutomationRule, rows: Vec<MetricsRow>) -> Self {
        Self::with_config(rule, rows, config(Duration::ZERO))
    }

    pub fn with_config(rule: AutomationRule, rows: Vec<MetricsRow>, config: EngineConfig) -> Self {
        let rules = Arc::new(MemoryRules::default());
        rules.insert(rule);
        let gateway = Arc::new(FakeGateway::seeded(&rows));
        let metrics = Arc::new(MemoryMetrics::with_rows(rows));
        let ledger = Arc::new(MemoryLedger::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let orchestrator = Orchestrator::new(
            Collaborators {
                rules: rules.clone(),
                metrics: metrics.clone(),
                gateway: gateway.clone(),
                ledger: ledger.clone(),
                notifier: notifier.clone(),
            },
            &config,
        );

        Self {
            rules,
            metrics,
            gateway,
            ledger,
            notifier,
            orchestrator: Arc::new(orchestrator),
        }
    }
}
